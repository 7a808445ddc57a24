//! `switch` node — routes a message to outputs by rule matching.

use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    ExecutionContext, Invocation, Message, NodeBody, NodeConfig, NodeDefinition, NodeError,
    NodeInstance, NodeOutput, NodeRegistry, NodeUi, Port,
};
use serde_json::{json, Value};

pub fn register(registry: &NodeRegistry) {
    registry.register(
        NodeDefinition::new("switch", "function", 1, 1, Switch)
            .with_defaults(json!({"property": "payload", "rules": [], "checkall": true}))
            .with_ui(NodeUi {
                icon: Some("switch".into()),
                color: Some("#e2d96e".into()),
                palette_label: Some("switch".into()),
                properties: json!({"property": "string", "rules": "array", "checkall": "bool"}),
            }),
    );
}

/// For each rule `i`, a clone of the input goes to output `i` iff the rule
/// matches the configured property. With `checkall=false` evaluation stops
/// after the first match. Output count equals the rule count.
struct Switch;

impl NodeBody for Switch {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let property = node.config_str("property").unwrap_or("payload");
            let check_all = node.config_bool("checkall").unwrap_or(true);
            let rules = node
                .config_value("rules")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            let candidate = msg.get(property).unwrap_or(Value::Null);
            let mut ports = vec![Port::Empty; rules.len()];
            for (index, rule) in rules.iter().enumerate() {
                match rule_matches(rule, &candidate) {
                    Ok(true) => {
                        ports[index] = Port::One(msg.clone());
                        if !check_all {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(reason) => node.warn(&format!("switch rule {index} skipped: {reason}")),
                }
            }
            Ok(NodeOutput::Ports(ports))
        })
    }

    fn outputs(&self, config: &NodeConfig, declared: usize) -> usize {
        config
            .option("rules")
            .and_then(Value::as_array)
            .map(|rules| rules.len().max(1))
            .unwrap_or(declared)
    }
}

/// Numeric view of a JSON value, accepting numeric strings.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare_numeric(a: &Value, b: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn rule_matches(rule: &Value, candidate: &Value) -> Result<bool, String> {
    let op = rule
        .get("t")
        .and_then(Value::as_str)
        .ok_or("rule has no 't'")?;
    let operand = rule.get("v");

    let matched = match op {
        "eq" => {
            // Structural equality, plus numeric equality across
            // representations ("1" == 1).
            operand == Some(candidate)
                || operand.is_some_and(|v| compare_numeric(candidate, v, |a, b| a == b))
        }
        "neq" => !rule_matches(&json!({"t": "eq", "v": operand}), candidate)?,
        "lt" => operand.is_some_and(|v| compare_numeric(candidate, v, |a, b| a < b)),
        "lte" => operand.is_some_and(|v| compare_numeric(candidate, v, |a, b| a <= b)),
        "gt" => operand.is_some_and(|v| compare_numeric(candidate, v, |a, b| a > b)),
        "gte" => operand.is_some_and(|v| compare_numeric(candidate, v, |a, b| a >= b)),
        "btwn" => {
            let low = rule.get("v");
            let high = rule.get("v2");
            match (low, high) {
                (Some(low), Some(high)) => {
                    compare_numeric(candidate, low, |a, b| a >= b)
                        && compare_numeric(candidate, high, |a, b| a <= b)
                }
                _ => return Err("btwn needs 'v' and 'v2'".into()),
            }
        }
        "cont" => {
            let needle = operand
                .and_then(Value::as_str)
                .ok_or("cont needs a string 'v'")?;
            match candidate {
                Value::String(s) => s.contains(needle),
                Value::Array(items) => items.iter().any(|item| item.as_str() == Some(needle)),
                _ => false,
            }
        }
        "regex" => {
            let pattern = operand
                .and_then(Value::as_str)
                .ok_or("regex needs a string 'v'")?;
            let re = regex::Regex::new(pattern).map_err(|e| format!("bad regex: {e}"))?;
            candidate.as_str().is_some_and(|s| re.is_match(s))
        }
        "true" => candidate == &Value::Bool(true),
        "false" => candidate == &Value::Bool(false),
        "null" => candidate.is_null(),
        "nnull" => !candidate.is_null(),
        "empty" => match candidate {
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            Value::Null => true,
            _ => false,
        },
        "nempty" => !rule_matches(&json!({"t": "empty"}), candidate)?,
        "istype" => {
            let ty = operand
                .and_then(Value::as_str)
                .ok_or("istype needs a string 'v'")?;
            match ty {
                "string" => candidate.is_string(),
                "number" => candidate.is_number(),
                "boolean" => candidate.is_boolean(),
                "array" => candidate.is_array(),
                "object" => candidate.is_object(),
                "null" => candidate.is_null(),
                other => return Err(format!("unknown istype operand {other}")),
            }
        }
        other => return Err(format!("unknown operator {other}")),
    };
    Ok(matched)
}
