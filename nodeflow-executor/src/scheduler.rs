//! Per-shard alarm handler.
//!
//! Fires repeating trigger nodes from persisted schedule records, then does
//! opportunistic housekeeping (idle eviction, debug/log trims) and re-arms
//! the alarm. Runs inside the actor turn, so a tick fully completes before
//! the shard accepts its next external request, and two ticks of the same
//! schedule can never overlap.

use std::str::FromStr;

use chrono::Utc;
use nodeflow_core::Message;
use nodeflow_storage::keys;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::shard::ShardExecutor;

#[derive(Debug, Serialize, Deserialize)]
struct ScheduleRecord {
    node_id: String,
    flow_id: String,
    repeat: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cron: Option<String>,
    next_run_epoch_ms: i64,
}

pub(crate) async fn on_alarm(executor: &mut ShardExecutor) {
    let now = Utc::now().timestamp_millis();
    run_due_schedules(executor, now).await;
    housekeeping(executor, now).await;
    let interval = executor.config.alarm_interval;
    executor.arm_alarm(interval).await;
}

async fn run_due_schedules(executor: &mut ShardExecutor, now: i64) {
    let entries = match executor.storage.get_many(keys::SCHEDULE).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(shard = %executor.id, error = %err, "failed to enumerate schedules");
            return;
        }
    };

    for (key, value) in entries {
        let mut record: ScheduleRecord = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(shard = %executor.id, key = %key, error = %err, "dropping malformed schedule record");
                executor.storage.delete(key).await;
                continue;
            }
        };
        if record.next_run_epoch_ms > now {
            continue;
        }

        let engine = match executor.engine_for_flow(&record.flow_id, None).await {
            Ok(engine) => engine,
            Err(err) => {
                // The owning flow is gone; retire the schedule.
                tracing::warn!(
                    shard = %executor.id,
                    flow_id = %record.flow_id,
                    error = %err,
                    "schedule points at an unavailable flow, removing"
                );
                executor.storage.delete(key).await;
                continue;
            }
        };

        let msg = Message::new(json!(now)).with_topic("scheduled");
        if let Err(err) = engine.execute_node(&record.node_id, msg).await {
            tracing::warn!(
                shard = %executor.id,
                node_id = %record.node_id,
                error = %err,
                "scheduled execution failed"
            );
        }

        if record.repeat {
            match next_run(&record, now) {
                Some(next) => {
                    record.next_run_epoch_ms = next;
                    match serde_json::to_value(&record) {
                        Ok(value) => executor.storage.set(key, value).await,
                        Err(err) => {
                            tracing::warn!(shard = %executor.id, error = %err, "failed to encode schedule")
                        }
                    }
                }
                None => executor.storage.delete(key).await,
            }
        } else {
            executor.storage.delete(key).await;
        }
    }
}

fn next_run(record: &ScheduleRecord, now: i64) -> Option<i64> {
    if let Some(interval_ms) = record.interval_ms {
        return Some(now + interval_ms as i64);
    }
    let expr = record.cron.as_deref()?;
    let schedule = cron::Schedule::from_str(expr).ok()?;
    schedule
        .after(&Utc::now())
        .next()
        .map(|t| t.timestamp_millis())
}

async fn housekeeping(executor: &mut ShardExecutor, now: i64) {
    // Idle shards drop their hot state; persisted KV survives.
    let idle_ms = executor.config.idle_timeout.as_millis() as i64;
    if now - executor.last_activity_ms > idle_ms && !executor.engines.is_empty() {
        tracing::info!(shard = %executor.id, "idle timeout reached, evicting engines");
        executor.evict_engines().await;
    }

    trim_ring(executor, keys::DEBUG, executor.config.max_debug).await;
    trim_ring(executor, keys::LOG, executor.config.max_logs).await;
}

/// Delete the oldest entries under `prefix` beyond `keep`. Record keys
/// embed a millisecond timestamp, so key order tracks age.
async fn trim_ring(executor: &mut ShardExecutor, prefix: &str, keep: usize) {
    let entries = match executor.storage.get_many(prefix).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(shard = %executor.id, prefix = %prefix, error = %err, "trim scan failed");
            return;
        }
    };
    if entries.len() <= keep {
        return;
    }

    let mut aged: Vec<(i64, String)> = entries
        .into_iter()
        .map(|(key, value)| {
            let ts = value
                .get("timestamp")
                .and_then(serde_json::Value::as_i64)
                .or_else(|| key.rsplit(':').next().and_then(|s| s.parse().ok()))
                .unwrap_or(0);
            (ts, key)
        })
        .collect();
    aged.sort();
    let excess = aged.len() - keep;
    let doomed: Vec<String> = aged.into_iter().take(excess).map(|(_, key)| key).collect();
    tracing::debug!(shard = %executor.id, prefix = %prefix, dropped = doomed.len(), "trimmed ring");
    executor.storage.delete_keys(doomed).await;
}
