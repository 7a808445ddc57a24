//! Standard node set.
//!
//! Every mandatory node type of the runtime, registered through
//! [`register_builtins`]. Each module owns one family of node bodies and
//! its registration metadata; the bodies only touch the public surface of
//! `nodeflow-core` (node instance, execution context, invocation).

pub mod change;
pub mod context;
pub mod debug;
pub mod delay;
pub mod events;
pub mod file;
pub mod function;
pub mod http;
pub mod inject;
pub mod json;
pub mod split;
pub mod switch;
pub mod template;

use nodeflow_core::NodeRegistry;

/// Register the complete standard node set into `registry`.
///
/// Call once at startup, before any engine initialises.
pub fn register_builtins(registry: &NodeRegistry) {
    http::register(registry);
    function::register(registry);
    change::register(registry);
    switch::register(registry);
    template::register(registry);
    json::register(registry);
    delay::register(registry);
    split::register(registry);
    inject::register(registry);
    debug::register(registry);
    context::register(registry);
    file::register(registry);
    events::register(registry);
}

/// Build a message from a loose JSON value: well-known slots are lifted,
/// everything else lands in the side bag. Missing ids get a fresh one.
pub(crate) fn message_from_value(value: serde_json::Value) -> nodeflow_core::Message {
    match serde_json::from_value::<nodeflow_core::Message>(value.clone()) {
        Ok(msg) => msg,
        Err(_) => {
            let mut msg = nodeflow_core::Message::new(serde_json::Value::Null);
            if let serde_json::Value::Object(map) = value {
                for (key, val) in map {
                    match key.as_str() {
                        "id" => {
                            if let serde_json::Value::String(s) = &val {
                                msg.id = s.clone();
                            }
                        }
                        "topic" => msg.topic = val.as_str().map(str::to_string),
                        "payload" => msg.payload = val,
                        other => {
                            msg.extra.insert(other.to_string(), val);
                        }
                    }
                }
            } else {
                msg.payload = value;
            }
            msg
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for node tests.

    use std::collections::HashMap;
    use std::sync::Arc;

    use nodeflow_core::{
        EventBus, ExecutionContext, Invocation, NodeConfig, NodeDefinition, NodeInstance,
    };
    use nodeflow_storage::{BatchedStorage, MemoryStorage};
    use tokio_util::sync::CancellationToken;

    pub fn ctx() -> ExecutionContext {
        ctx_with_env(HashMap::new())
    }

    pub fn ctx_with_env(env: HashMap<String, String>) -> ExecutionContext {
        let storage = BatchedStorage::new(Arc::new(MemoryStorage::new()));
        ExecutionContext::new("test-flow", storage, env)
    }

    pub fn inv() -> Invocation {
        Invocation::new(CancellationToken::new(), 1_000)
    }

    pub fn node(config: serde_json::Value, def: &NodeDefinition) -> NodeInstance {
        let config: NodeConfig = serde_json::from_value(config).unwrap();
        NodeInstance::new(&config, def, EventBus::new())
    }
}
