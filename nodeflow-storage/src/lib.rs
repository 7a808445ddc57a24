//! Durable shard storage for Nodeflow.
//!
//! Each shard owns exactly one [`DurableStorage`] handle. The trait mirrors
//! the narrow surface the runtime needs: point reads/writes, prefix scans,
//! bulk operations, and a single alarm slot used by the per-shard scheduler.
//!
//! Writes from flow execution go through [`BatchedStorage`], a
//! write-coalescing wrapper that stages mutations in memory and flushes them
//! at shard-turn boundaries (or after a short interval). Reads through the
//! wrapper always observe staged writes first.

pub mod batched;
pub mod keys;
pub mod memory;

pub use batched::BatchedStorage;
pub use memory::MemoryStorage;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

/// Errors from storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// The backend rejected or failed the operation.
    Backend(String),
    /// A stored value could not be decoded.
    Codec(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Backend(msg) => write!(f, "storage backend error: {msg}"),
            StorageError::Codec(msg) => write!(f, "storage codec error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Codec(err.to_string())
    }
}

/// Boxed future type used by the object-safe storage traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Pluggable durable storage backend for one shard.
///
/// Values are arbitrary JSON. Keys are opaque to the backend; the runtime's
/// key layout lives in [`keys`].
pub trait DurableStorage: Send + Sync + 'static {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StorageError>>;

    /// All entries whose key starts with `prefix`, in key order.
    fn get_many<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<(String, Value)>, StorageError>>;

    fn put<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StorageError>>;

    fn put_many<'a>(
        &'a self,
        entries: Vec<(String, Value)>,
    ) -> BoxFuture<'a, Result<(), StorageError>>;

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, StorageError>>;

    fn delete_many<'a>(&'a self, keys: Vec<String>) -> BoxFuture<'a, Result<usize, StorageError>>;

    /// Keys starting with `prefix`, in key order.
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>, StorageError>>;

    /// Arm the shard's single alarm slot (epoch milliseconds).
    fn set_alarm<'a>(&'a self, epoch_ms: i64) -> BoxFuture<'a, Result<(), StorageError>>;

    fn get_alarm<'a>(&'a self) -> BoxFuture<'a, Result<Option<i64>, StorageError>>;

    fn delete_alarm<'a>(&'a self) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Wipe the shard. Used by `session/clear`.
    fn delete_all<'a>(&'a self) -> BoxFuture<'a, Result<(), StorageError>>;
}

/// Shared handle to a storage backend.
pub type SharedStorage = Arc<dyn DurableStorage>;
