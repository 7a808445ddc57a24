//! `file` node — named blobs in shard storage.
//!
//! Not a real filesystem: content lives under `file:<name>` in the shard,
//! which keeps the sandboxing story simple and the data scoped to its
//! shard.

use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    ExecutionContext, Invocation, Message, NodeBody, NodeDefinition, NodeError, NodeInstance,
    NodeOutput, NodeRegistry, NodeUi,
};
use nodeflow_storage::keys;
use serde_json::{json, Value};

pub fn register(registry: &NodeRegistry) {
    registry.register(
        NodeDefinition::new("file", "storage", 1, 1, FileNode)
            .with_defaults(json!({"action": "read"}))
            .with_ui(NodeUi {
                icon: Some("file".into()),
                color: Some("#ffcc66".into()),
                palette_label: Some("file".into()),
                properties: json!({"action": "string", "filename": "string"}),
            }),
    );
}

/// `read` puts the content into the payload; `write`/`append` store the
/// payload as text; `delete` removes the entry. The filename comes from
/// config or, failing that, a `filename` field on the message.
struct FileNode;

impl NodeBody for FileNode {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        mut msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let filename = node
                .config_str("filename")
                .map(str::to_string)
                .or_else(|| {
                    msg.get("filename")
                        .and_then(|v| v.as_str().map(str::to_string))
                })
                .ok_or_else(|| NodeError::new("file: no filename configured"))?;
            let key = keys::file(&filename);
            let action = node.config_str("action").unwrap_or("read");

            match action {
                "read" => {
                    msg.payload = ctx.storage().get(&key).await?.unwrap_or(Value::Null);
                }
                "write" => {
                    ctx.storage().set(key, content(&msg.payload)).await;
                }
                "append" => {
                    let existing = ctx
                        .storage()
                        .get(&key)
                        .await?
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    let appended = format!("{existing}{}", text(&msg.payload));
                    ctx.storage().set(key, Value::String(appended)).await;
                }
                "delete" => {
                    ctx.storage().delete(key).await;
                }
                other => return Err(NodeError::new(format!("file: unknown action {other}"))),
            }
            Ok(NodeOutput::One(msg))
        })
    }
}

fn content(payload: &Value) -> Value {
    match payload {
        Value::String(_) => payload.clone(),
        other => Value::String(other.to_string()),
    }
}

fn text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
