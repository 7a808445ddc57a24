//! Sharded executor.
//!
//! One long-lived actor per shard identity. The actor owns the shard's hot
//! engines, session scratch, route cache, rate-limit counters, WebSocket
//! broadcast, and the alarm clock, and it is the sole mutator of its shard
//! storage. Inbound requests, alarm ticks, and control calls for one shard
//! are serialised through a single inbox; different shards run in
//! parallel.

pub mod config;
pub mod manager;
pub mod rate_limit;
pub mod response;
pub mod routes;
pub mod scheduler;
pub mod shard;

pub use config::{ExecutorConfig, RateLimitConfig};
pub use manager::ShardManager;
pub use response::{ResponseBody, ShardResponse};
pub use shard::{ShardHandle, ShardId, ShardKind, ShardRequest};
