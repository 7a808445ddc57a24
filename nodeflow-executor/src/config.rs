//! Executor tunables.

use std::time::Duration;

/// Fixed-window rate limit applied on user shards.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests: u64,
    pub window_ms: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 60,
            window_ms: 60_000,
        }
    }
}

/// Per-shard runtime settings. One copy is shared by every shard of a
/// manager.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Prefix stripped from inbound paths before route resolution.
    pub api_prefix: String,
    /// Idle interval after which engines, session data, and route cache
    /// are evicted.
    pub idle_timeout: Duration,
    /// Cadence of the shard alarm.
    pub alarm_interval: Duration,
    /// Write-coalescing flush interval.
    pub flush_interval: Duration,
    /// Route-cache entry lifetime.
    pub route_ttl: Duration,
    /// Debug-ring retention.
    pub max_debug: usize,
    /// Execution-log retention.
    pub max_logs: usize,
    /// Bodies above this size are streamed.
    pub large_body_bytes: usize,
    pub rate_limit: RateLimitConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api".to_string(),
            idle_timeout: Duration::from_secs(3600),
            alarm_interval: Duration::from_secs(60),
            flush_interval: Duration::from_millis(100),
            route_ttl: Duration::from_secs(60),
            max_debug: 1000,
            max_logs: 100,
            large_body_bytes: 1 << 20,
            rate_limit: RateLimitConfig::default(),
        }
    }
}
