//! `split` and `join` — stream fan-out and reassembly.
//!
//! `split` turns an array/object/string payload into one message per
//! element, each carrying a `parts` descriptor with a shared stream id.
//! `join` buffers incoming messages in shard storage until the target
//! count is reached, then emits a single array-payload message. The buffer
//! persists across engine evictions because it lives under `j:<node_id>`.

use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    ExecutionContext, Invocation, Message, NodeBody, NodeDefinition, NodeError, NodeInstance,
    NodeOutput, NodeRegistry, NodeUi, Parts, PartsKind, Port,
};
use nodeflow_storage::keys;
use serde_json::{json, Value};
use uuid::Uuid;

pub fn register(registry: &NodeRegistry) {
    registry.register(
        NodeDefinition::new("split", "sequence", 1, 1, Split)
            .with_defaults(json!({"separator": "\n"}))
            .with_ui(NodeUi {
                icon: Some("split".into()),
                color: Some("#e2d96e".into()),
                palette_label: Some("split".into()),
                properties: json!({"separator": "string"}),
            }),
    );
    registry.register(
        NodeDefinition::new("join", "sequence", 1, 1, Join)
            .with_defaults(json!({}))
            .with_ui(NodeUi {
                icon: Some("join".into()),
                color: Some("#e2d96e".into()),
                palette_label: Some("join".into()),
                properties: json!({"count": "number"}),
            }),
    );
}

// ── split ────────────────────────────────────────────────────────────────

struct Split;

impl NodeBody for Split {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let stream_id = Uuid::new_v4().to_string();
            let pieces: Vec<(Option<String>, Value)> = match &msg.payload {
                Value::Array(items) => items.iter().map(|v| (None, v.clone())).collect(),
                Value::Object(map) => map
                    .iter()
                    .map(|(k, v)| (Some(k.clone()), v.clone()))
                    .collect(),
                Value::String(text) => {
                    let separator = node.config_str("separator").unwrap_or("\n");
                    text.split(separator)
                        .map(|piece| (None, Value::String(piece.to_string())))
                        .collect()
                }
                _ => {
                    return Err(NodeError::new(
                        "split: payload is not an array, object, or string",
                    ))
                }
            };

            let kind = match &msg.payload {
                Value::Array(_) => PartsKind::Array,
                Value::Object(_) => PartsKind::Object,
                _ => PartsKind::String,
            };

            let count = pieces.len();
            let messages = pieces
                .into_iter()
                .enumerate()
                .map(|(index, (key, value))| {
                    let mut part = msg.clone();
                    part.payload = value;
                    part.parts = Some(Parts {
                        stream_id: stream_id.clone(),
                        index,
                        count: Some(count),
                        kind,
                        key,
                    });
                    part
                })
                .collect();
            Ok(NodeOutput::Ports(vec![Port::Many(messages)]))
        })
    }
}

// ── join ─────────────────────────────────────────────────────────────────

struct Join;

/// Persisted buffer for one stream: received entries plus the target count.
#[derive(serde::Serialize, serde::Deserialize)]
struct JoinBuffer {
    entries: Vec<JoinEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct JoinEntry {
    index: usize,
    payload: Value,
}

impl NodeBody for Join {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let storage = ctx.storage();
            let buffer_key = keys::join_buffer(node.id());

            // Buffers are keyed per stream so interleaved splits don't mix.
            let stream_id = msg
                .parts
                .as_ref()
                .map(|p| p.stream_id.clone())
                .unwrap_or_else(|| "unparted".to_string());
            let stream_key = format!("{buffer_key}:{stream_id}");

            let mut buffer: JoinBuffer = match storage.get(&stream_key).await? {
                Some(value) => serde_json::from_value(value)?,
                None => JoinBuffer {
                    entries: Vec::new(),
                    count: None,
                },
            };

            let index = msg
                .parts
                .as_ref()
                .map(|p| p.index)
                .unwrap_or(buffer.entries.len());
            buffer.entries.push(JoinEntry {
                index,
                payload: msg.payload.clone(),
            });

            // Target count: explicit config, else auto-detected from parts.
            let target = node
                .config_u64("count")
                .map(|n| n as usize)
                .or_else(|| msg.parts.as_ref().and_then(|p| p.count))
                .or(buffer.count);
            buffer.count = target;

            match target {
                Some(target) if buffer.entries.len() >= target => {
                    storage.delete(&stream_key).await;

                    // Reassemble in parts order.
                    buffer.entries.sort_by_key(|e| e.index);
                    let payload: Vec<Value> =
                        buffer.entries.into_iter().map(|e| e.payload).collect();
                    let count = payload.len();

                    let mut joined = msg;
                    let kind = joined
                        .parts
                        .take()
                        .map(|p| p.kind)
                        .unwrap_or(PartsKind::Array);
                    joined.payload = Value::Array(payload);
                    joined.parts = Some(Parts {
                        stream_id,
                        index: 0,
                        count: Some(count),
                        kind,
                        key: None,
                    });
                    Ok(NodeOutput::One(joined))
                }
                Some(_) => {
                    storage
                        .set(stream_key, serde_json::to_value(&buffer)?)
                        .await;
                    Ok(NodeOutput::None)
                }
                None => {
                    node.warn("join: no count configured and message has no parts; buffering");
                    storage
                        .set(stream_key, serde_json::to_value(&buffer)?)
                        .await;
                    Ok(NodeOutput::None)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn split_def() -> NodeDefinition {
        NodeDefinition::new("split", "sequence", 1, 1, Split)
            .with_defaults(json!({"separator": "\n"}))
    }

    fn join_def() -> NodeDefinition {
        NodeDefinition::new("join", "sequence", 1, 1, Join)
    }

    async fn split_messages(payload: Value) -> Vec<Message> {
        let def = split_def();
        let node = testing::node(json!({"id": "sp", "type": "split", "wires": [[]]}), &def);
        let ctx = testing::ctx();
        let inv = testing::inv();
        match def
            .body
            .execute(&node, &ctx, &inv, Message::new(payload))
            .await
            .unwrap()
        {
            NodeOutput::Ports(mut ports) => match ports.pop() {
                Some(Port::Many(msgs)) => msgs,
                other => panic!("unexpected port: {other:?}"),
            },
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn split_array_assigns_indexed_parts() {
        let msgs = split_messages(json!([10, 20, 30])).await;
        assert_eq!(msgs.len(), 3);
        for (i, msg) in msgs.iter().enumerate() {
            let parts = msg.parts.as_ref().unwrap();
            assert_eq!(parts.index, i);
            assert_eq!(parts.count, Some(3));
            assert_eq!(parts.kind, PartsKind::Array);
        }
        let shared_stream = &msgs[0].parts.as_ref().unwrap().stream_id;
        assert!(msgs
            .iter()
            .all(|m| &m.parts.as_ref().unwrap().stream_id == shared_stream));
    }

    #[tokio::test]
    async fn split_object_carries_member_keys() {
        let msgs = split_messages(json!({"a": 1, "b": 2})).await;
        assert_eq!(msgs.len(), 2);
        let keys: Vec<_> = msgs
            .iter()
            .map(|m| m.parts.as_ref().unwrap().key.clone().unwrap())
            .collect();
        assert!(keys.contains(&"a".to_string()));
        assert!(keys.contains(&"b".to_string()));
    }

    #[tokio::test]
    async fn split_string_by_separator() {
        let msgs = split_messages(json!("a\nb")).await;
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].payload, json!("a"));
        assert_eq!(msgs[1].payload, json!("b"));
    }

    #[tokio::test]
    async fn split_scalar_is_an_error() {
        let def = split_def();
        let node = testing::node(json!({"id": "sp", "type": "split", "wires": [[]]}), &def);
        let ctx = testing::ctx();
        let inv = testing::inv();
        assert!(def
            .body
            .execute(&node, &ctx, &inv, Message::new(json!(42)))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn split_then_join_reproduces_order_even_out_of_order() {
        let split_msgs = split_messages(json!(["x", "y", "z"])).await;

        let def = join_def();
        let node = testing::node(json!({"id": "jn", "type": "join", "wires": [[]]}), &def);
        let ctx = testing::ctx();
        let inv = testing::inv();

        // Deliver out of order; join must honour parts.index.
        let mut reordered = split_msgs;
        reordered.swap(0, 2);
        let mut final_output = None;
        for msg in reordered {
            match def.body.execute(&node, &ctx, &inv, msg).await.unwrap() {
                NodeOutput::None => {}
                NodeOutput::One(joined) => final_output = Some(joined),
                other => panic!("unexpected output: {other:?}"),
            }
        }

        let joined = final_output.expect("join must emit after the last part");
        assert_eq!(joined.payload, json!(["x", "y", "z"]));
        assert_eq!(joined.parts.as_ref().unwrap().count, Some(3));
    }

    #[tokio::test]
    async fn join_with_explicit_count_and_no_parts() {
        let def = join_def();
        let node = testing::node(
            json!({"id": "jn", "type": "join", "count": 2, "wires": [[]]}),
            &def,
        );
        let ctx = testing::ctx();
        let inv = testing::inv();

        let out1 = def
            .body
            .execute(&node, &ctx, &inv, Message::new(json!("first")))
            .await
            .unwrap();
        assert!(matches!(out1, NodeOutput::None));

        let out2 = def
            .body
            .execute(&node, &ctx, &inv, Message::new(json!("second")))
            .await
            .unwrap();
        match out2 {
            NodeOutput::One(joined) => {
                assert_eq!(joined.payload, json!(["first", "second"]));
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
