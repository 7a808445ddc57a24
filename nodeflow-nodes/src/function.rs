//! `function` node — user-supplied expressions evaluated in a sandbox.
//!
//! Bodies are untrusted strings. They run in an embedded rhai engine with
//! hard operation/size limits and no filesystem or network surface. The
//! script sees `msg`, the `flow` and `global` scopes (as maps, written
//! back after evaluation), the read-only `env` map, and a `node` info map.
//! Whatever the script returns is routed under the standard node-output
//! semantics: unit consumes the message, a map is a message on output 0,
//! an array maps elements to output ports (inner arrays fan out).

use dashmap::DashMap;
use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    ExecutionContext, Invocation, Message, NodeBody, NodeConfig, NodeDefinition, NodeError,
    NodeInstance, NodeOutput, NodeRegistry, NodeUi, Port, ScopedKv,
};
use serde_json::{json, Map, Value};

pub fn register(registry: &NodeRegistry) {
    registry.register(
        NodeDefinition::new("function", "function", 1, 1, FunctionBody::new())
            .with_defaults(json!({"func": "msg", "outputs": 1}))
            .with_ui(NodeUi {
                icon: Some("function".into()),
                color: Some("#fdd0a2".into()),
                palette_label: Some("function".into()),
                properties: json!({"func": "code", "outputs": "number"}),
            }),
    );
}

const MAX_OPERATIONS: u64 = 100_000;
const MAX_CALL_LEVELS: usize = 32;
const MAX_STRING_SIZE: usize = 1 << 20;
const MAX_ARRAY_SIZE: usize = 10_000;

pub struct FunctionBody {
    engine: rhai::Engine,
    /// Compiled scripts keyed by node id, populated by `on_init`.
    asts: DashMap<String, rhai::AST>,
}

impl FunctionBody {
    pub fn new() -> Self {
        let mut engine = rhai::Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        engine.set_max_string_size(MAX_STRING_SIZE);
        engine.set_max_array_size(MAX_ARRAY_SIZE);
        engine.set_max_map_size(MAX_ARRAY_SIZE);
        engine.on_print(|text| tracing::info!(target: "function_node", "{text}"));
        engine.on_debug(|text, _, pos| {
            tracing::debug!(target: "function_node", position = %pos, "{text}")
        });
        Self {
            engine,
            asts: DashMap::new(),
        }
    }

    fn compile(&self, node_id: &str, source: &str) -> Result<(), NodeError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|err| NodeError::new(format!("function compile error: {err}")))?;
        self.asts.insert(node_id.to_string(), ast);
        Ok(())
    }
}

impl Default for FunctionBody {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a scope into a JSON object for the script.
async fn snapshot(kv: &ScopedKv) -> Result<Map<String, Value>, NodeError> {
    let mut out = Map::new();
    for key in kv.keys().await? {
        if let Some(value) = kv.get(&key).await? {
            out.insert(key, value);
        }
    }
    Ok(out)
}

/// Persist script-side mutations of a scope map.
async fn write_back(
    kv: &ScopedKv,
    before: &Map<String, Value>,
    after: &Map<String, Value>,
) -> Result<(), NodeError> {
    for (key, value) in after {
        if before.get(key) != Some(value) {
            kv.set(key, value.clone()).await;
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            kv.delete(key).await;
        }
    }
    Ok(())
}

fn to_message(value: Value, input: &Message) -> Message {
    match value {
        Value::Object(_) => crate::message_from_value(value),
        other => {
            let mut msg = input.clone();
            msg.payload = other;
            msg
        }
    }
}

fn to_output(value: Value, input: &Message) -> NodeOutput {
    match value {
        Value::Null => NodeOutput::None,
        Value::Array(elements) => {
            let ports = elements
                .into_iter()
                .map(|element| match element {
                    Value::Null => Port::Empty,
                    Value::Array(msgs) => {
                        Port::Many(msgs.into_iter().map(|m| to_message(m, input)).collect())
                    }
                    other => Port::One(to_message(other, input)),
                })
                .collect();
            NodeOutput::Ports(ports)
        }
        other => NodeOutput::One(to_message(other, input)),
    }
}

impl NodeBody for FunctionBody {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let ast = self
                .asts
                .get(node.id())
                .map(|entry| entry.value().clone())
                .ok_or_else(|| NodeError::new("function: script not compiled"))?;

            let flow_kv = ctx.flow_scope();
            let global_kv = ctx.global_scope();
            let flow_before = snapshot(&flow_kv).await?;
            let global_before = snapshot(&global_kv).await?;

            let mut scope = rhai::Scope::new();
            scope.push_dynamic(
                "msg",
                rhai::serde::to_dynamic(&msg).map_err(|e| NodeError::new(e.to_string()))?,
            );
            scope.push_dynamic(
                "flow",
                rhai::serde::to_dynamic(&flow_before).map_err(|e| NodeError::new(e.to_string()))?,
            );
            scope.push_dynamic(
                "global",
                rhai::serde::to_dynamic(&global_before)
                    .map_err(|e| NodeError::new(e.to_string()))?,
            );
            scope.push_dynamic(
                "env",
                rhai::serde::to_dynamic(ctx.env()).map_err(|e| NodeError::new(e.to_string()))?,
            );
            scope.push_dynamic(
                "node",
                rhai::serde::to_dynamic(&json!({
                    "id": node.id(),
                    "type": node.node_type(),
                    "name": node.name(),
                }))
                .map_err(|e| NodeError::new(e.to_string()))?,
            );

            let result: rhai::Dynamic = self
                .engine
                .eval_ast_with_scope(&mut scope, &ast)
                .map_err(|err| NodeError::new(format!("function error: {err}")))?;

            // Persist scope mutations before routing the output.
            for (name, before, kv) in [
                ("flow", &flow_before, &flow_kv),
                ("global", &global_before, &global_kv),
            ] {
                if let Some(dynamic) = scope.get(name) {
                    let after: Value = rhai::serde::from_dynamic(dynamic)
                        .map_err(|e| NodeError::new(e.to_string()))?;
                    if let Value::Object(after) = after {
                        write_back(kv, before, &after).await?;
                    }
                }
            }

            let value: Value =
                rhai::serde::from_dynamic(&result).map_err(|e| NodeError::new(e.to_string()))?;
            Ok(to_output(value, &msg))
        })
    }

    fn on_init<'a>(
        &'a self,
        node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<(), NodeError>> {
        Box::pin(async move {
            let source = node.config_str("func").unwrap_or("msg").to_string();
            self.compile(node.id(), &source)
        })
    }

    fn on_close<'a>(
        &'a self,
        node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<(), NodeError>> {
        Box::pin(async move {
            self.asts.remove(node.id());
            Ok(())
        })
    }

    fn outputs(&self, config: &NodeConfig, declared: usize) -> usize {
        config.option_u64("outputs").map(|n| n as usize).unwrap_or(declared)
    }
}
