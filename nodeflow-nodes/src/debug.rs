//! `debug` node — appends records to the shard's debug ring.

use chrono::Utc;
use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    ExecutionContext, Invocation, Message, NodeBody, NodeDefinition, NodeError, NodeInstance,
    NodeOutput, NodeRegistry, NodeUi,
};
use nodeflow_storage::keys;
use serde_json::{json, Value};

pub fn register(registry: &NodeRegistry) {
    registry.register(
        NodeDefinition::new("debug", "output", 1, 0, Debug)
            .with_defaults(json!({"property": "payload", "complete": false}))
            .with_ui(NodeUi {
                icon: Some("debug".into()),
                color: Some("#87a980".into()),
                palette_label: Some("debug".into()),
                properties: json!({"property": "string", "complete": "bool"}),
            }),
    );
}

/// Writes `{timestamp, node_id, msg_id, value}` under `d:<node_id>:<ts>`.
/// The scheduler trims the ring by oldest past the retention cap.
struct Debug;

impl NodeBody for Debug {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let value = if node.config_bool("complete").unwrap_or(false) {
                serde_json::to_value(&msg)?
            } else {
                let property = node.config_str("property").unwrap_or("payload");
                msg.get(property).unwrap_or(Value::Null)
            };

            let ts = Utc::now().timestamp_millis();
            let record = json!({
                "timestamp": ts,
                "node_id": node.id(),
                "msg_id": msg.id,
                "value": value,
            });
            tracing::debug!(node_id = %node.id(), msg_id = %msg.id, "debug record");
            ctx.storage()
                .set(keys::debug_record(node.id(), ts), record)
                .await;
            Ok(NodeOutput::None)
        })
    }
}
