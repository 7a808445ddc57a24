//! Fixed-window rate limiting for user shards.
//!
//! The counter is persisted under `rl:<user_id>` so a shard cold-start
//! does not reset the window.

use chrono::Utc;
use nodeflow_storage::{keys, BatchedStorage, StorageError};
use serde::{Deserialize, Serialize};

use crate::config::RateLimitConfig;

#[derive(Debug, Serialize, Deserialize)]
struct Window {
    count: u64,
    reset_at: i64,
}

/// Outcome of one admission check.
#[derive(Debug, PartialEq)]
pub enum Admission {
    Allowed,
    /// Denied; hint for the `Retry-After` style field.
    Denied { retry_after_seconds: i64 },
}

/// Check and count one request for `user_id` against the fixed window.
pub async fn admit(
    storage: &BatchedStorage,
    user_id: &str,
    limit: &RateLimitConfig,
) -> Result<Admission, StorageError> {
    let key = keys::rate_limit(user_id);
    let now = Utc::now().timestamp_millis();

    let mut window = match storage.get(&key).await? {
        Some(value) => serde_json::from_value(value)?,
        None => Window {
            count: 0,
            reset_at: now + limit.window_ms,
        },
    };
    if now >= window.reset_at {
        window = Window {
            count: 0,
            reset_at: now + limit.window_ms,
        };
    }

    if window.count >= limit.requests {
        let retry_after_seconds = ((window.reset_at - now) + 999) / 1000;
        return Ok(Admission::Denied {
            retry_after_seconds: retry_after_seconds.max(1),
        });
    }

    window.count += 1;
    storage.set(key, serde_json::to_value(&window)?).await;
    Ok(Admission::Allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_storage::MemoryStorage;
    use std::sync::Arc;

    fn storage() -> BatchedStorage {
        BatchedStorage::new(Arc::new(MemoryStorage::new()))
    }

    fn limit(requests: u64, window_ms: i64) -> RateLimitConfig {
        RateLimitConfig {
            requests,
            window_ms,
        }
    }

    #[tokio::test]
    async fn allows_up_to_the_limit_then_denies() {
        let storage = storage();
        let limit = limit(3, 1_000_000);
        for _ in 0..3 {
            assert_eq!(
                admit(&storage, "u1", &limit).await.unwrap(),
                Admission::Allowed
            );
        }
        match admit(&storage, "u1", &limit).await.unwrap() {
            Admission::Denied {
                retry_after_seconds,
            } => assert!(retry_after_seconds >= 1),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn windows_are_per_user() {
        let storage = storage();
        let limit = limit(1, 1_000_000);
        assert_eq!(
            admit(&storage, "u1", &limit).await.unwrap(),
            Admission::Allowed
        );
        assert_eq!(
            admit(&storage, "u2", &limit).await.unwrap(),
            Admission::Allowed
        );
        assert!(matches!(
            admit(&storage, "u1", &limit).await.unwrap(),
            Admission::Denied { .. }
        ));
    }

    #[tokio::test]
    async fn window_expiry_resets_the_counter() {
        let storage = storage();
        let limit = limit(1, 1);
        assert_eq!(
            admit(&storage, "u1", &limit).await.unwrap(),
            Admission::Allowed
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(
            admit(&storage, "u1", &limit).await.unwrap(),
            Admission::Allowed
        );
    }
}
