//! `catch` and `status` — event-stream taps.
//!
//! These nodes never receive wired traffic; the engine feeds them
//! synthetic messages off the error and status event streams. Their
//! bodies are pass-throughs so downstream wiring proceeds as with any
//! other message.

use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    ExecutionContext, Invocation, Message, NodeBody, NodeDefinition, NodeError, NodeInstance,
    NodeOutput, NodeRegistry, NodeUi,
};
use serde_json::json;

pub fn register(registry: &NodeRegistry) {
    registry.register(
        NodeDefinition::new("catch", "input", 0, 1, Tap)
            .with_ui(NodeUi {
                icon: Some("alert".into()),
                color: Some("#e49191".into()),
                palette_label: Some("catch".into()),
                properties: json!({}),
            }),
    );
    registry.register(
        NodeDefinition::new("status", "input", 0, 1, Tap)
            .with_ui(NodeUi {
                icon: Some("status".into()),
                color: Some("#c0edc0".into()),
                palette_label: Some("status".into()),
                properties: json!({}),
            }),
    );
}

struct Tap;

impl NodeBody for Tap {
    fn execute<'a>(
        &'a self,
        _node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move { Ok(NodeOutput::One(msg)) })
    }
}
