//! `template` node — `{{path}}` substitution over message paths.

use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    ExecutionContext, Invocation, Message, NodeBody, NodeDefinition, NodeError, NodeInstance,
    NodeOutput, NodeRegistry, NodeUi,
};
use serde_json::{json, Value};

pub fn register(registry: &NodeRegistry) {
    registry.register(
        NodeDefinition::new("template", "function", 1, 1, Template)
            .with_defaults(json!({"template": "", "field": "payload", "output": "str"}))
            .with_ui(NodeUi {
                icon: Some("template".into()),
                color: Some("#e2d96e".into()),
                palette_label: Some("template".into()),
                properties: json!({"template": "code", "field": "string", "output": "string"}),
            }),
    );
}

/// Substitutes `{{path}}` placeholders with message-path lookups and
/// writes the result to the configured field. With `output: "json"` the
/// rendered string is parsed before being stored.
struct Template;

impl NodeBody for Template {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        mut msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let template = node.config_str("template").unwrap_or("").to_string();
            let field = node.config_str("field").unwrap_or("payload").to_string();
            let output = node.config_str("output").unwrap_or("str").to_string();

            let rendered = render(&template, &msg);
            let value = if output == "json" {
                serde_json::from_str(&rendered)
                    .map_err(|e| NodeError::new(format!("template: output is not JSON: {e}")))?
            } else {
                Value::String(rendered)
            };
            msg.set(&field, value);
            Ok(NodeOutput::One(msg))
        })
    }
}

fn render(template: &str, msg: &Message) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let path = after[..end].trim();
                out.push_str(&lookup(msg, path));
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated placeholder; emit verbatim.
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn lookup(msg: &Message, path: &str) -> String {
    match msg.get(path) {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    async fn run(config: Value, msg: Message) -> Message {
        let def = NodeDefinition::new("template", "function", 1, 1, Template);
        let node = testing::node(config, &def);
        let ctx = testing::ctx();
        let inv = testing::inv();
        match def.body.execute(&node, &ctx, &inv, msg).await.unwrap() {
            NodeOutput::One(msg) => msg,
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn substitutes_paths() {
        let msg = run(
            json!({
                "id": "t", "type": "template",
                "template": "Hello {{payload.name}}, topic={{topic}}!",
                "wires": []
            }),
            Message::new(json!({"name": "ada"})).with_topic("greet"),
        )
        .await;
        assert_eq!(msg.payload, json!("Hello ada, topic=greet!"));
    }

    #[tokio::test]
    async fn missing_paths_render_empty() {
        let msg = run(
            json!({"id": "t", "type": "template", "template": "[{{payload.nope}}]", "wires": []}),
            Message::new(json!({})),
        )
        .await;
        assert_eq!(msg.payload, json!("[]"));
    }

    #[tokio::test]
    async fn json_output_parses() {
        let msg = run(
            json!({
                "id": "t", "type": "template",
                "template": "{\"n\": {{payload.n}}}",
                "output": "json",
                "wires": []
            }),
            Message::new(json!({"n": 7})),
        )
        .await;
        assert_eq!(msg.payload, json!({"n": 7}));
    }

    #[tokio::test]
    async fn writes_to_configured_field() {
        let msg = run(
            json!({
                "id": "t", "type": "template",
                "template": "v={{payload}}", "field": "rendered",
                "wires": []
            }),
            Message::new(json!(3)),
        )
        .await;
        assert_eq!(msg.get("rendered"), Some(json!("v=3")));
        assert_eq!(msg.payload, json!(3));
    }
}
