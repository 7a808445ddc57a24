//! `delay` node — suspends the current branch.

use std::time::Duration;

use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    ExecutionContext, Invocation, Message, NodeBody, NodeDefinition, NodeError, NodeInstance,
    NodeOutput, NodeRegistry, NodeUi,
};
use serde_json::json;

pub fn register(registry: &NodeRegistry) {
    registry.register(
        NodeDefinition::new("delay", "function", 1, 1, Delay)
            .with_defaults(json!({"delay_ms": 1000}))
            .with_ui(NodeUi {
                icon: Some("timer".into()),
                color: Some("#e6e0f8".into()),
                palette_label: Some("delay".into()),
                properties: json!({"delay_ms": "number"}),
            }),
    );
}

/// Sleeps for `delay_ms` before emitting. Cancellation from the trigger
/// wins over the timer and consumes the message.
struct Delay;

impl NodeBody for Delay {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        inv: &'a Invocation,
        msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let pause = Duration::from_millis(node.config_u64("delay_ms").unwrap_or(1000));
            tokio::select! {
                _ = tokio::time::sleep(pause) => Ok(NodeOutput::One(msg)),
                _ = inv.cancel_token().cancelled() => Ok(NodeOutput::None),
            }
        })
    }
}
