//! In-memory storage backend.
//!
//! The default backend for embedded use and tests. Keys live in a
//! `BTreeMap` so prefix scans come back in key order, matching what the
//! trait promises.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::{BoxFuture, DurableStorage, StorageError};

/// In-memory [`DurableStorage`] backed by a `BTreeMap`.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, Value>>,
    alarm: Mutex<Option<i64>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries. Test helper.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn prefix_range(entries: &BTreeMap<String, Value>, prefix: &str) -> Vec<(String, Value)> {
    entries
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl DurableStorage for MemoryStorage {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StorageError>> {
        Box::pin(async move { Ok(self.entries.lock().unwrap().get(key).cloned()) })
    }

    fn get_many<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<(String, Value)>, StorageError>> {
        Box::pin(async move { Ok(prefix_range(&self.entries.lock().unwrap(), prefix)) })
    }

    fn put<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.entries.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        })
    }

    fn put_many<'a>(
        &'a self,
        entries: Vec<(String, Value)>,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let mut map = self.entries.lock().unwrap();
            for (k, v) in entries {
                map.insert(k, v);
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move { Ok(self.entries.lock().unwrap().remove(key).is_some()) })
    }

    fn delete_many<'a>(&'a self, keys: Vec<String>) -> BoxFuture<'a, Result<usize, StorageError>> {
        Box::pin(async move {
            let mut map = self.entries.lock().unwrap();
            let mut removed = 0;
            for key in keys {
                if map.remove(&key).is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>, StorageError>> {
        Box::pin(async move {
            let map = self.entries.lock().unwrap();
            Ok(map
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect())
        })
    }

    fn set_alarm<'a>(&'a self, epoch_ms: i64) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            *self.alarm.lock().unwrap() = Some(epoch_ms);
            Ok(())
        })
    }

    fn get_alarm<'a>(&'a self) -> BoxFuture<'a, Result<Option<i64>, StorageError>> {
        Box::pin(async move { Ok(*self.alarm.lock().unwrap()) })
    }

    fn delete_alarm<'a>(&'a self) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            *self.alarm.lock().unwrap() = None;
            Ok(())
        })
    }

    fn delete_all<'a>(&'a self) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.entries.lock().unwrap().clear();
            *self.alarm.lock().unwrap() = None;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = MemoryStorage::new();
        store.put("a", json!(1)).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!(1)));
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_many_scans_prefix_in_order() {
        let store = MemoryStorage::new();
        store.put("f:b", json!(2)).await.unwrap();
        store.put("f:a", json!(1)).await.unwrap();
        store.put("g:x", json!(3)).await.unwrap();

        let entries = store.get_many("f:").await.unwrap();
        assert_eq!(
            entries,
            vec![("f:a".to_string(), json!(1)), ("f:b".to_string(), json!(2))]
        );
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = MemoryStorage::new();
        store.put("k", json!("v")).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn alarm_slot() {
        let store = MemoryStorage::new();
        assert_eq!(store.get_alarm().await.unwrap(), None);
        store.set_alarm(42).await.unwrap();
        assert_eq!(store.get_alarm().await.unwrap(), Some(42));
        store.delete_alarm().await.unwrap();
        assert_eq!(store.get_alarm().await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_all_clears_entries_and_alarm() {
        let store = MemoryStorage::new();
        store.put("k", json!("v")).await.unwrap();
        store.set_alarm(7).await.unwrap();
        store.delete_all().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.get_alarm().await.unwrap(), None);
    }
}
