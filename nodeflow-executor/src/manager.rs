//! Shard manager — spawns and addresses shard actors.
//!
//! Shards are created lazily on first use and keep their storage backend
//! across engine evictions, so per-shard KV state survives a cold start.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use nodeflow_core::{NodeRegistry, SharedCatalog};
use nodeflow_storage::{MemoryStorage, SharedStorage};

use crate::config::ExecutorConfig;
use crate::shard::{self, ShardHandle, ShardId};

type StorageProvider = dyn Fn(&ShardId) -> SharedStorage + Send + Sync;

pub struct ShardManager {
    config: ExecutorConfig,
    catalog: SharedCatalog,
    registry: Arc<NodeRegistry>,
    env: HashMap<String, String>,
    shards: DashMap<ShardId, ShardHandle>,
    /// Stable storage per shard id, independent of actor lifetime.
    storages: DashMap<ShardId, SharedStorage>,
    provider: Arc<StorageProvider>,
}

impl ShardManager {
    pub fn new(catalog: SharedCatalog, registry: Arc<NodeRegistry>, config: ExecutorConfig) -> Self {
        Self {
            config,
            catalog,
            registry,
            env: HashMap::new(),
            shards: DashMap::new(),
            storages: DashMap::new(),
            provider: Arc::new(|_| Arc::new(MemoryStorage::new())),
        }
    }

    /// Environment map exposed read-only inside `function` bodies.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Swap the storage backend factory (e.g. for a durable store).
    pub fn with_storage_provider(
        mut self,
        provider: impl Fn(&ShardId) -> SharedStorage + Send + Sync + 'static,
    ) -> Self {
        self.provider = Arc::new(provider);
        self
    }

    /// Address a shard, spawning its actor on first use.
    pub fn shard(&self, id: ShardId) -> ShardHandle {
        if let Some(handle) = self.shards.get(&id) {
            return handle.clone();
        }
        let storage = self
            .storages
            .entry(id.clone())
            .or_insert_with(|| (self.provider)(&id))
            .clone();
        let handle = shard::spawn(
            id.clone(),
            self.config.clone(),
            self.catalog.clone(),
            self.registry.clone(),
            storage,
            self.env.clone(),
        );
        self.shards.insert(id, handle.clone());
        handle
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}
