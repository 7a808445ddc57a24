//! Storage key layout.
//!
//! The layout is bit-stable: persisted data survives process restarts and
//! engine evictions, so the prefixes below must not change.
//!
//! | Prefix | Contents |
//! |--------|----------|
//! | `f:`   | flow-scope KV (`f:<flow_id>:<key>`) |
//! | `g:`   | global-scope KV |
//! | `s:`   | session scratch |
//! | `d:`   | debug records (`d:<node_id>:<ts>`) |
//! | `l:`   | execution log (`l:<ts>`) |
//! | `j:`   | join buffers (`j:<node_id>`) |
//! | `sched:` | schedule records (`sched:<node_id>`) |
//! | `rl:`  | rate-limit counters (`rl:<user_id>`) |
//! | `cache:` | misc cache |
//! | `file:` | file-node storage (`file:<name>`) |
//! | `n:`   | per-node KV (`n:<node_id>:<key>`) |

pub const FLOW_SCOPE: &str = "f:";
pub const GLOBAL_SCOPE: &str = "g:";
pub const SESSION: &str = "s:";
pub const DEBUG: &str = "d:";
pub const LOG: &str = "l:";
pub const JOIN: &str = "j:";
pub const SCHEDULE: &str = "sched:";
pub const RATE_LIMIT: &str = "rl:";
pub const CACHE: &str = "cache:";
pub const FILE: &str = "file:";
pub const NODE_SCOPE: &str = "n:";

/// Flow-scope prefix for one flow: `f:<flow_id>:`.
pub fn flow_scope(flow_id: &str) -> String {
    format!("{FLOW_SCOPE}{flow_id}:")
}

/// Node-scope prefix for one node: `n:<node_id>:`.
pub fn node_scope(node_id: &str) -> String {
    format!("{NODE_SCOPE}{node_id}:")
}

pub fn session(key: &str) -> String {
    format!("{SESSION}{key}")
}

pub fn debug_record(node_id: &str, ts_ms: i64) -> String {
    format!("{DEBUG}{node_id}:{ts_ms}")
}

pub fn log_record(ts_ms: i64) -> String {
    format!("{LOG}{ts_ms}")
}

pub fn join_buffer(node_id: &str) -> String {
    format!("{JOIN}{node_id}")
}

pub fn schedule(node_id: &str) -> String {
    format!("{SCHEDULE}{node_id}")
}

pub fn rate_limit(user_id: &str) -> String {
    format!("{RATE_LIMIT}{user_id}")
}

pub fn file(name: &str) -> String {
    format!("{FILE}{name}")
}
