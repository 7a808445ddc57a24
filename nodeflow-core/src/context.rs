//! Per-engine execution context.
//!
//! Bundles the shard storage handle, the environment dictionary, and the
//! scoped key/value stores node bodies see. Flow-scope is namespaced per
//! flow id within the shard; global-scope is shared by every flow of the
//! shard. All writes go through the batched storage wrapper, so reads
//! observe pending writes before the durable copy.

use std::collections::HashMap;

use nodeflow_storage::{keys, BatchedStorage, StorageError};
use serde_json::Value;

/// Per-invocation context bundle handed to node bodies.
pub struct ExecutionContext {
    flow_id: String,
    storage: BatchedStorage,
    env: HashMap<String, String>,
}

impl ExecutionContext {
    pub fn new(
        flow_id: impl Into<String>,
        storage: BatchedStorage,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            storage,
            env,
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    /// Environment map, read-only to node bodies.
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn storage(&self) -> &BatchedStorage {
        &self.storage
    }

    /// KV visible to all nodes of this flow (`f:<flow_id>:`).
    pub fn flow_scope(&self) -> ScopedKv {
        ScopedKv {
            storage: self.storage.clone(),
            prefix: keys::flow_scope(&self.flow_id),
        }
    }

    /// KV shared across flows within the shard (`g:`).
    pub fn global_scope(&self) -> ScopedKv {
        ScopedKv {
            storage: self.storage.clone(),
            prefix: keys::GLOBAL_SCOPE.to_string(),
        }
    }

    /// KV private to one node (`n:<node_id>:`).
    pub fn node_scope(&self, node_id: &str) -> ScopedKv {
        ScopedKv {
            storage: self.storage.clone(),
            prefix: keys::node_scope(node_id),
        }
    }
}

/// One namespaced key/value store. Keys are opaque; values serialisable.
#[derive(Clone)]
pub struct ScopedKv {
    storage: BatchedStorage,
    prefix: String,
}

impl ScopedKv {
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.storage.get(&format!("{}{key}", self.prefix)).await
    }

    pub async fn set(&self, key: &str, value: Value) {
        self.storage
            .set(format!("{}{key}", self.prefix), value)
            .await;
    }

    pub async fn delete(&self, key: &str) {
        self.storage.delete(format!("{}{key}", self.prefix)).await;
    }

    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .storage
            .list(&self.prefix)
            .await?
            .into_iter()
            .map(|k| k[self.prefix.len()..].to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_storage::MemoryStorage;
    use serde_json::json;
    use std::sync::Arc;

    fn context(flow_id: &str) -> ExecutionContext {
        let storage = BatchedStorage::new(Arc::new(MemoryStorage::new()));
        ExecutionContext::new(flow_id, storage, HashMap::new())
    }

    #[tokio::test]
    async fn flow_scope_is_namespaced_per_flow() {
        let storage = BatchedStorage::new(Arc::new(MemoryStorage::new()));
        let ctx_a = ExecutionContext::new("flow-a", storage.clone(), HashMap::new());
        let ctx_b = ExecutionContext::new("flow-b", storage.clone(), HashMap::new());

        ctx_a.flow_scope().set("counter", json!(1)).await;
        assert_eq!(ctx_b.flow_scope().get("counter").await.unwrap(), None);
        assert_eq!(
            ctx_a.flow_scope().get("counter").await.unwrap(),
            Some(json!(1))
        );
    }

    #[tokio::test]
    async fn global_scope_is_shared_across_flows() {
        let storage = BatchedStorage::new(Arc::new(MemoryStorage::new()));
        let ctx_a = ExecutionContext::new("flow-a", storage.clone(), HashMap::new());
        let ctx_b = ExecutionContext::new("flow-b", storage, HashMap::new());

        ctx_a.global_scope().set("shared", json!("yes")).await;
        assert_eq!(
            ctx_b.global_scope().get("shared").await.unwrap(),
            Some(json!("yes"))
        );
    }

    #[tokio::test]
    async fn keys_strips_the_prefix() {
        let ctx = context("f1");
        let kv = ctx.flow_scope();
        kv.set("b", json!(2)).await;
        kv.set("a", json!(1)).await;
        assert_eq!(kv.keys().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn node_scope_is_private_per_node() {
        let ctx = context("f1");
        ctx.node_scope("n1").set("state", json!(1)).await;
        assert_eq!(ctx.node_scope("n2").get("state").await.unwrap(), None);
        assert_eq!(
            ctx.node_scope("n1").get("state").await.unwrap(),
            Some(json!(1))
        );
    }

    #[tokio::test]
    async fn delete_removes_pending_value() {
        let ctx = context("f1");
        let kv = ctx.flow_scope();
        kv.set("k", json!(1)).await;
        kv.delete("k").await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}
