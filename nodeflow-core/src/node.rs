//! Per-flow node instance.
//!
//! The stable handle a node body sees: identity, merged configuration,
//! status, structured log sinks, and the wires the engine routes along.
//! Instances are created on `engine.initialize()` and dropped on `close()`.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{EventBus, FlowEvent};
use crate::flow::NodeConfig;
use crate::message::{Message, NodeRef};
use crate::registry::NodeDefinition;

/// Status descriptor written by node bodies, observed by the UI channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub text: String,
    #[serde(default)]
    pub level: StatusLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    #[default]
    Ok,
    Busy,
    Warn,
    Error,
}

impl NodeStatus {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level: StatusLevel::Ok,
        }
    }

    pub fn busy(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level: StatusLevel::Busy,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level: StatusLevel::Error,
        }
    }
}

/// Runtime handle for one node of a flow.
pub struct NodeInstance {
    id: String,
    node_type: String,
    name: Option<String>,
    config: Value,
    outputs: usize,
    wires: Vec<Vec<String>>,
    status: Mutex<Option<NodeStatus>>,
    bus: EventBus,
}

impl NodeInstance {
    /// Build an instance from its configuration and registered definition.
    /// Definition defaults are merged under the node's own options.
    pub fn new(config: &NodeConfig, def: &NodeDefinition, bus: EventBus) -> Self {
        let outputs = def.body.outputs(config, def.outputs);
        let mut merged = match &def.defaults {
            Value::Object(defaults) => defaults.clone(),
            _ => serde_json::Map::new(),
        };
        for (key, value) in &config.options {
            merged.insert(key.clone(), value.clone());
        }
        Self {
            id: config.id.clone(),
            node_type: config.node_type.clone(),
            name: config.name.clone(),
            config: Value::Object(merged),
            outputs,
            wires: config.wires.clone(),
            status: Mutex::new(None),
            bus,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    pub fn wires(&self) -> &[Vec<String>] {
        &self.wires
    }

    pub(crate) fn retain_wire_targets(&mut self, keep: impl Fn(&str) -> bool) {
        for targets in &mut self.wires {
            targets.retain(|t| keep(t));
        }
    }

    /// Read-only view of the merged configuration.
    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }

    pub fn config_i64(&self, key: &str) -> Option<i64> {
        self.config.get(key).and_then(Value::as_i64)
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(Value::as_bool)
    }

    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef {
            id: self.id.clone(),
            node_type: self.node_type.clone(),
            name: self.name.clone(),
        }
    }

    /// Write the status descriptor and notify observers. Last writer wins;
    /// the field is the only hot mutation on a shared instance.
    pub fn set_status(&self, status: NodeStatus) {
        *self.status.lock().unwrap() = Some(status.clone());
        self.bus.emit(FlowEvent::Status {
            source: self.node_ref(),
            status,
        });
    }

    pub fn status(&self) -> Option<NodeStatus> {
        self.status.lock().unwrap().clone()
    }

    pub fn log(&self, message: &str) {
        tracing::info!(node_id = %self.id, node_type = %self.node_type, "{message}");
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(node_id = %self.id, node_type = %self.node_type, "{message}");
    }

    /// Log an error, optionally attaching the offending message, and feed
    /// the catch bus.
    pub fn error(&self, message: &str, msg: Option<&Message>) {
        match msg {
            Some(m) => {
                tracing::error!(node_id = %self.id, node_type = %self.node_type, msg_id = %m.id, "{message}");
            }
            None => {
                tracing::error!(node_id = %self.id, node_type = %self.node_type, "{message}");
            }
        }
        if let Some(m) = msg {
            self.bus.emit(FlowEvent::Error {
                source: self.node_ref(),
                message: message.to_string(),
                msg: Box::new(m.clone()),
            });
        }
    }

    /// The flow's event bus. Node bodies use it for intra-flow pub/sub
    /// (`emit`/`subscribe`); the engine feeds `catch` and `status` nodes
    /// from the same stream.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BoxFuture, NodeBody};
    use crate::{ExecutionContext, Invocation, NodeError, NodeOutput};
    use serde_json::json;

    struct Noop;

    impl NodeBody for Noop {
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

    fn instance() -> NodeInstance {
        let config: NodeConfig = serde_json::from_value(json!({
            "id": "n1",
            "type": "noop",
            "rules": ["a"],
            "wires": [["n2"]]
        }))
        .unwrap();
        let def = NodeDefinition::new("noop", "common", 1, 1, Noop)
            .with_defaults(json!({"rules": [], "timeout": 5}));
        NodeInstance::new(&config, &def, EventBus::new())
    }

    #[test]
    fn options_override_defaults() {
        let node = instance();
        assert_eq!(node.config_value("rules"), Some(&json!(["a"])));
        assert_eq!(node.config_u64("timeout"), Some(5));
    }

    #[test]
    fn status_last_writer_wins_and_emits() {
        let node = instance();
        let mut rx = node.bus().subscribe();
        node.set_status(NodeStatus::busy("working"));
        node.set_status(NodeStatus::ok("done"));
        assert_eq!(node.status(), Some(NodeStatus::ok("done")));

        // Both writes were observable.
        assert!(matches!(rx.try_recv().unwrap(), FlowEvent::Status { .. }));
        assert!(matches!(rx.try_recv().unwrap(), FlowEvent::Status { .. }));
    }

    #[test]
    fn error_with_message_feeds_the_bus() {
        let node = instance();
        let mut rx = node.bus().subscribe();
        let msg = Message::new(json!(1));
        node.error("boom", Some(&msg));
        match rx.try_recv().unwrap() {
            FlowEvent::Error {
                source,
                message,
                msg: attached,
            } => {
                assert_eq!(source.id, "n1");
                assert_eq!(message, "boom");
                assert_eq!(attached.id, msg.id);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
