//! Write-coalescing wrapper around [`DurableStorage`].
//!
//! `set`/`delete` are staged in memory; a flush is scheduled after
//! `flush_interval` (default 100 ms) or forced by [`BatchedStorage::flush`].
//! Reads always consult the staging buffer first, so a `set` followed by a
//! `get` in the same shard turn observes the written value, and a staged
//! `delete` hides the durable value.
//!
//! The staging buffer is held across the backend write during a flush, so
//! concurrent readers never observe the window between "drained from the
//! buffer" and "visible in the backend".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::{DurableStorage, SharedStorage, StorageError};

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone)]
enum Pending {
    Put(Value),
    Delete,
}

/// Clonable write-coalescing handle over a shard's storage backend.
#[derive(Clone)]
pub struct BatchedStorage {
    backend: SharedStorage,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    flush_interval: Duration,
    flush_armed: Arc<AtomicBool>,
}

impl BatchedStorage {
    pub fn new(backend: SharedStorage) -> Self {
        Self::with_flush_interval(backend, DEFAULT_FLUSH_INTERVAL)
    }

    pub fn with_flush_interval(backend: SharedStorage, flush_interval: Duration) -> Self {
        Self {
            backend,
            pending: Arc::new(Mutex::new(HashMap::new())),
            flush_interval,
            flush_armed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The underlying backend, for operations that bypass the write buffer
    /// (alarms, `delete_all`).
    pub fn backend(&self) -> &SharedStorage {
        &self.backend
    }

    /// Read a value, preferring staged writes over the durable copy.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let pending = self.pending.lock().await;
        match pending.get(key) {
            Some(Pending::Put(value)) => Ok(Some(value.clone())),
            Some(Pending::Delete) => Ok(None),
            None => {
                drop(pending);
                self.backend.get(key).await
            }
        }
    }

    /// Prefix scan merging the durable entries with the staging buffer.
    pub async fn get_many(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError> {
        let pending = self.pending.lock().await;
        let mut merged: std::collections::BTreeMap<String, Value> = self
            .backend
            .get_many(prefix)
            .await?
            .into_iter()
            .collect();
        for (key, entry) in pending.iter() {
            if !key.starts_with(prefix) {
                continue;
            }
            match entry {
                Pending::Put(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                Pending::Delete => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Keys under `prefix`, staging buffer included.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .get_many(prefix)
            .await?
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }

    /// Stage a write and arm the interval flush.
    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.pending
            .lock()
            .await
            .insert(key.into(), Pending::Put(value));
        self.arm_flush();
    }

    /// Stage a delete and arm the interval flush.
    pub async fn delete(&self, key: impl Into<String>) {
        self.pending.lock().await.insert(key.into(), Pending::Delete);
        self.arm_flush();
    }

    /// Stage deletes for a batch of keys.
    pub async fn delete_keys(&self, keys: impl IntoIterator<Item = String>) {
        let mut pending = self.pending.lock().await;
        for key in keys {
            pending.insert(key, Pending::Delete);
        }
        drop(pending);
        self.arm_flush();
    }

    /// Number of staged mutations.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Push all staged mutations to the backend.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(());
        }

        let mut puts = Vec::new();
        let mut deletes = Vec::new();
        for (key, entry) in pending.iter() {
            match entry {
                Pending::Put(value) => puts.push((key.clone(), value.clone())),
                Pending::Delete => deletes.push(key.clone()),
            }
        }

        // Buffer stays locked while the backend write is in flight so reads
        // never miss staged values mid-flush.
        if !puts.is_empty() {
            self.backend.put_many(puts).await?;
        }
        if !deletes.is_empty() {
            self.backend.delete_many(deletes).await?;
        }
        pending.clear();
        Ok(())
    }

    fn arm_flush(&self) {
        if self.flush_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.flush_interval).await;
            this.flush_armed.store(false, Ordering::SeqCst);
            if let Err(err) = this.flush().await {
                tracing::warn!(error = %err, "interval flush failed");
            }
        });
    }
}
