//! `inject` node — manual or scheduled message source.
//!
//! On `on_init` a repeating inject persists a schedule record under
//! `sched:<node_id>`; the shard scheduler fires it by calling
//! `execute_node` with a synthetic tick message. The record survives
//! engine evictions, so schedules keep firing after a cold start.

use chrono::Utc;
use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    ExecutionContext, Invocation, Message, NodeBody, NodeDefinition, NodeError, NodeInstance,
    NodeOutput, NodeRegistry, NodeUi,
};
use nodeflow_storage::keys;
use serde_json::{json, Value};
use std::str::FromStr;

pub fn register(registry: &NodeRegistry) {
    registry.register(
        NodeDefinition::new("inject", "input", 0, 1, Inject)
            .with_defaults(json!({"payload_type": "date"}))
            .with_ui(NodeUi {
                icon: Some("inject".into()),
                color: Some("#a6bbcf".into()),
                palette_label: Some("inject".into()),
                properties: json!({
                    "payload": "any", "payload_type": "string",
                    "topic": "string", "repeat_ms": "number", "crontab": "string"
                }),
            }),
    );
}

struct Inject;

impl NodeBody for Inject {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let mut out = msg;
            out.payload = build_payload(node)?;
            if let Some(topic) = node.config_str("topic") {
                out.topic = Some(topic.to_string());
            }
            Ok(NodeOutput::One(out))
        })
    }

    fn on_init<'a>(
        &'a self,
        node: &'a NodeInstance,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<(), NodeError>> {
        Box::pin(async move {
            let now = Utc::now().timestamp_millis();
            let record = match (node.config_u64("repeat_ms"), node.config_str("crontab")) {
                // Interval wins when both are configured.
                (Some(interval_ms), _) => Some(json!({
                    "node_id": node.id(),
                    "flow_id": ctx.flow_id(),
                    "repeat": true,
                    "interval_ms": interval_ms,
                    "next_run_epoch_ms": now + interval_ms as i64,
                })),
                (None, Some(expr)) => {
                    let schedule = cron::Schedule::from_str(expr)
                        .map_err(|e| NodeError::new(format!("inject: bad crontab: {e}")))?;
                    let next = schedule
                        .after(&Utc::now())
                        .next()
                        .map(|t| t.timestamp_millis())
                        .ok_or_else(|| NodeError::new("inject: crontab never fires"))?;
                    Some(json!({
                        "node_id": node.id(),
                        "flow_id": ctx.flow_id(),
                        "repeat": true,
                        "cron": expr,
                        "next_run_epoch_ms": next,
                    }))
                }
                (None, None) => None,
            };

            if let Some(record) = record {
                ctx.storage().set(keys::schedule(node.id()), record).await;
            }
            Ok(())
        })
    }
}

fn build_payload(node: &NodeInstance) -> Result<Value, NodeError> {
    let payload_type = node.config_str("payload_type").unwrap_or("date");
    let configured = node.config_value("payload").cloned().unwrap_or(Value::Null);
    let payload = match payload_type {
        "date" => json!(Utc::now().timestamp_millis()),
        "str" => match configured {
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        },
        "num" => match &configured {
            Value::Number(_) => configured,
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|n| serde_json::Number::from_f64(n))
                .map(Value::Number)
                .ok_or_else(|| NodeError::new("inject: payload is not a number"))?,
            _ => return Err(NodeError::new("inject: payload is not a number")),
        },
        "bool" => match &configured {
            Value::Bool(_) => configured,
            Value::String(s) => Value::Bool(s == "true"),
            _ => return Err(NodeError::new("inject: payload is not a boolean")),
        },
        "json" => match configured {
            Value::String(s) => serde_json::from_str(&s)
                .map_err(|e| NodeError::new(format!("inject: payload is not JSON: {e}")))?,
            other => other,
        },
        other => return Err(NodeError::new(format!("inject: unknown payload_type {other}"))),
    };
    Ok(payload)
}
