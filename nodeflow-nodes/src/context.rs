//! `context` node — flow-scope / global-scope KV access from a graph.

use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    ExecutionContext, Invocation, Message, NodeBody, NodeDefinition, NodeError, NodeInstance,
    NodeOutput, NodeRegistry, NodeUi, ScopedKv,
};
use serde_json::{json, Value};

pub fn register(registry: &NodeRegistry) {
    registry.register(
        NodeDefinition::new("context", "storage", 1, 1, ContextNode)
            .with_defaults(json!({"action": "get", "scope": "flow"}))
            .with_ui(NodeUi {
                icon: Some("db".into()),
                color: Some("#ffcc66".into()),
                palette_label: Some("context".into()),
                properties: json!({
                    "action": "string", "scope": "string", "key": "string", "value": "any"
                }),
            }),
    );
}

/// `get`/`set`/`keys`/`delete` against one scope by a configured key.
/// `set` stores the configured `value` (or the payload when absent);
/// `get` and `keys` write their result into the payload.
struct ContextNode;

impl NodeBody for ContextNode {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        mut msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let action = node.config_str("action").unwrap_or("get").to_string();
            let scope = node.config_str("scope").unwrap_or("flow");
            let kv: ScopedKv = match scope {
                "global" => ctx.global_scope(),
                _ => ctx.flow_scope(),
            };

            let key = || -> Result<&str, NodeError> {
                node.config_str("key")
                    .ok_or_else(|| NodeError::new("context: no key configured"))
            };

            match action.as_str() {
                "get" => {
                    msg.payload = kv.get(key()?).await?.unwrap_or(Value::Null);
                }
                "set" => {
                    let value = node
                        .config_value("value")
                        .cloned()
                        .unwrap_or_else(|| msg.payload.clone());
                    kv.set(key()?, value).await;
                }
                "delete" => {
                    kv.delete(key()?).await;
                }
                "keys" => {
                    msg.payload = json!(kv.keys().await?);
                }
                other => return Err(NodeError::new(format!("context: unknown action {other}"))),
            }
            Ok(NodeOutput::One(msg))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn def() -> NodeDefinition {
        NodeDefinition::new("context", "storage", 1, 1, ContextNode)
            .with_defaults(json!({"action": "get", "scope": "flow"}))
    }

    async fn run(ctx: &ExecutionContext, config: Value, msg: Message) -> Message {
        let def = def();
        let node = testing::node(config, &def);
        let inv = testing::inv();
        match def.body.execute(&node, ctx, &inv, msg).await.unwrap() {
            NodeOutput::One(msg) => msg,
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn set_then_get_roundtrip() {
        let ctx = testing::ctx();
        run(
            &ctx,
            json!({"id": "c", "type": "context", "action": "set", "key": "state", "wires": [[]]}),
            Message::new(json!({"step": 1})),
        )
        .await;

        let msg = run(
            &ctx,
            json!({"id": "c", "type": "context", "action": "get", "key": "state", "wires": [[]]}),
            Message::new(Value::Null),
        )
        .await;
        assert_eq!(msg.payload, json!({"step": 1}));
    }

    #[tokio::test]
    async fn keys_and_delete() {
        let ctx = testing::ctx();
        for key in ["a", "b"] {
            run(
                &ctx,
                json!({"id": "c", "type": "context", "action": "set", "key": key, "value": 1, "wires": [[]]}),
                Message::new(Value::Null),
            )
            .await;
        }

        let msg = run(
            &ctx,
            json!({"id": "c", "type": "context", "action": "keys", "wires": [[]]}),
            Message::new(Value::Null),
        )
        .await;
        assert_eq!(msg.payload, json!(["a", "b"]));

        run(
            &ctx,
            json!({"id": "c", "type": "context", "action": "delete", "key": "a", "wires": [[]]}),
            Message::new(Value::Null),
        )
        .await;
        let msg = run(
            &ctx,
            json!({"id": "c", "type": "context", "action": "get", "key": "a", "wires": [[]]}),
            Message::new(Value::Null),
        )
        .await;
        assert_eq!(msg.payload, Value::Null);
    }

    #[tokio::test]
    async fn global_scope_reaches_across_flows() {
        let ctx = testing::ctx();
        run(
            &ctx,
            json!({"id": "c", "type": "context", "action": "set", "scope": "global", "key": "g", "value": "shared", "wires": [[]]}),
            Message::new(Value::Null),
        )
        .await;
        assert_eq!(
            ctx.global_scope().get("g").await.unwrap(),
            Some(json!("shared"))
        );
    }
}
