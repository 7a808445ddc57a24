//! `change` node — ordered property rules over the message.

use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    ExecutionContext, Invocation, Message, NodeBody, NodeDefinition, NodeError, NodeInstance,
    NodeOutput, NodeRegistry, NodeUi,
};
use serde_json::{json, Value};

pub fn register(registry: &NodeRegistry) {
    registry.register(
        NodeDefinition::new("change", "function", 1, 1, Change)
            .with_defaults(json!({"rules": []}))
            .with_ui(NodeUi {
                icon: Some("swap".into()),
                color: Some("#e2d96e".into()),
                palette_label: Some("change".into()),
                properties: json!({"rules": "array"}),
            }),
    );
}

/// Applies an ordered rule list: `set`, `delete`, `move`. A failing rule is
/// logged and the remaining rules still apply.
///
/// Rule shape: `{"t": "set", "p": "payload.x", "to": <value>, "tot": "msg"?}`.
/// With `"tot": "msg"` the `to` field is a message path to read instead of
/// a literal.
struct Change;

impl NodeBody for Change {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        mut msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let rules = node
                .config_value("rules")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for rule in &rules {
                if let Err(reason) = apply_rule(&mut msg, rule) {
                    node.warn(&format!("change rule skipped: {reason}"));
                }
            }
            Ok(NodeOutput::One(msg))
        })
    }
}

fn apply_rule(msg: &mut Message, rule: &Value) -> Result<(), String> {
    let kind = rule
        .get("t")
        .and_then(Value::as_str)
        .ok_or("rule has no 't'")?;
    let path = rule
        .get("p")
        .and_then(Value::as_str)
        .ok_or("rule has no 'p'")?;

    match kind {
        "set" => {
            let to = rule.get("to").cloned().ok_or("set rule has no 'to'")?;
            let value = if rule.get("tot").and_then(Value::as_str) == Some("msg") {
                let source = to.as_str().ok_or("'tot: msg' requires a string path")?;
                msg.get(source).ok_or_else(|| format!("path {source} not found"))?
            } else {
                to
            };
            msg.set(path, value);
            Ok(())
        }
        "delete" => {
            msg.delete(path);
            Ok(())
        }
        "move" => {
            let to = rule
                .get("to")
                .and_then(Value::as_str)
                .ok_or("move rule has no 'to'")?;
            msg.move_field(path, to);
            Ok(())
        }
        other => Err(format!("unknown rule type {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    async fn run(rules: Value, msg: Message) -> Message {
        let def = NodeDefinition::new("change", "function", 1, 1, Change);
        let node = testing::node(
            json!({"id": "c1", "type": "change", "rules": rules, "wires": [[]]}),
            &def,
        );
        let ctx = testing::ctx();
        let inv = testing::inv();
        match def.body.execute(&node, &ctx, &inv, msg).await.unwrap() {
            NodeOutput::One(msg) => msg,
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn set_delete_move_in_order() {
        let msg = run(
            json!([
                {"t": "set", "p": "payload.added", "to": 1},
                {"t": "move", "p": "payload.added", "to": "payload.moved"},
                {"t": "delete", "p": "payload.junk"}
            ]),
            Message::new(json!({"junk": true})),
        )
        .await;
        assert_eq!(msg.payload, json!({"moved": 1}));
    }

    #[tokio::test]
    async fn set_from_message_path() {
        let msg = run(
            json!([{"t": "set", "p": "payload.copy", "to": "topic", "tot": "msg"}]),
            Message::new(json!({})).with_topic("orders"),
        )
        .await;
        assert_eq!(msg.get("payload.copy"), Some(json!("orders")));
    }

    #[tokio::test]
    async fn bad_rule_does_not_stop_the_rest() {
        let msg = run(
            json!([
                {"t": "unknown", "p": "payload.x"},
                {"t": "set", "p": "payload.x", "to": "applied"}
            ]),
            Message::new(json!({})),
        )
        .await;
        assert_eq!(msg.get("payload.x"), Some(json!("applied")));
    }
}
