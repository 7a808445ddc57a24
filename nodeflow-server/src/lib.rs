//! HTTP front-door for the flow runtime.
//!
//! Stateless: classifies inbound requests by URL prefix to a sharding
//! strategy, selects the shard identity, and forwards to the shard actor.
//! Also serves the health probe, the node-descriptor discovery endpoint,
//! and WebSocket upgrades on shard URLs.

pub mod config;
pub mod flows;
pub mod router;
pub mod ws;

pub use config::ServerConfig;
pub use router::{build_router, AppState};
