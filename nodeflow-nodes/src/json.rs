//! `json` node — parse/stringify a message property.

use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    ExecutionContext, Invocation, Message, NodeBody, NodeDefinition, NodeError, NodeInstance,
    NodeOutput, NodeRegistry, NodeUi,
};
use serde_json::{json, Value};

pub fn register(registry: &NodeRegistry) {
    registry.register(
        NodeDefinition::new("json", "function", 1, 1, JsonNode)
            .with_defaults(json!({"property": "payload", "action": ""}))
            .with_ui(NodeUi {
                icon: Some("parser-json".into()),
                color: Some("#e2d96e".into()),
                palette_label: Some("json".into()),
                properties: json!({"property": "string", "action": "string"}),
            }),
    );
}

/// `action: "obj"` parses, `action: "str"` stringifies, `action: ""`
/// auto-detects by the target's current type (string parses, anything else
/// stringifies). Values already in the requested form pass through.
struct JsonNode;

impl NodeBody for JsonNode {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        mut msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let property = node.config_str("property").unwrap_or("payload").to_string();
            let action = node.config_str("action").unwrap_or("").to_string();

            let current = msg
                .get(&property)
                .ok_or_else(|| NodeError::new(format!("json: property {property} not found")))?;

            let converted = match (action.as_str(), &current) {
                ("obj", Value::String(text)) => serde_json::from_str(text)
                    .map_err(|e| NodeError::new(format!("json: parse failed: {e}")))?,
                ("obj", other) => other.clone(),
                ("str", Value::String(_)) => current.clone(),
                ("str", other) => Value::String(serde_json::to_string(other)?),
                // Auto: direction from the current type.
                (_, Value::String(text)) => serde_json::from_str(text)
                    .map_err(|e| NodeError::new(format!("json: parse failed: {e}")))?,
                (_, other) => Value::String(serde_json::to_string(other)?),
            };
            msg.set(&property, converted);
            Ok(NodeOutput::One(msg))
        })
    }
}
