//! Nodeflow — a flow execution runtime over Axum.
//!
//! This facade crate re-exports the Nodeflow sub-crates through a single
//! dependency with feature flags.
//!
//! # Feature flags
//!
//! | Feature    | Default | Crate               |
//! |------------|---------|---------------------|
//! | `nodes`    | **yes** | `nodeflow-nodes`    |
//! | `executor` | **yes** | `nodeflow-executor` |
//! | `server`   | no      | `nodeflow-server`   |
//! | `full`     | no      | All of the above    |
//!
//! # Embedding
//!
//! ```ignore
//! use nodeflow::prelude::*;
//!
//! let registry = Arc::new(NodeRegistry::new());
//! nodeflow::nodeflow_nodes::register_builtins(&registry);
//!
//! let catalog = Arc::new(InMemoryCatalog::new());
//! catalog.insert_flow(FlowConfig::from_json(flow_json)?);
//!
//! let manager = ShardManager::new(catalog, registry, ExecutorConfig::default());
//! let shard = manager.shard(ShardId::new(ShardKind::Session, "s1"));
//! let response = shard.handle(ShardRequest::new("POST", "/api/echo")).await;
//! ```

pub extern crate nodeflow_core;
pub extern crate nodeflow_storage;

// Re-export everything from nodeflow-core at the top level for convenience.
pub use nodeflow_core::*;

#[cfg(feature = "nodes")]
pub use nodeflow_nodes;

#[cfg(feature = "executor")]
pub use nodeflow_executor;

#[cfg(feature = "server")]
pub use nodeflow_server;

pub mod prelude {
    //! Common imports for embedders.

    pub use nodeflow_core::{
        EngineError, ExecutionContext, FlowCatalog, FlowConfig, FlowEngine, HttpResponseOut,
        InMemoryCatalog, Invocation, Message, NodeBody, NodeDefinition, NodeError, NodeInstance,
        NodeOutput, NodeRegistry, Port, ResolvedRoute, SharedCatalog,
    };
    pub use nodeflow_storage::{BatchedStorage, DurableStorage, MemoryStorage, SharedStorage};

    #[cfg(feature = "executor")]
    pub use nodeflow_executor::{
        ExecutorConfig, ShardHandle, ShardId, ShardKind, ShardManager, ShardRequest, ShardResponse,
    };

    #[cfg(feature = "server")]
    pub use nodeflow_server::{build_router, AppState, ServerConfig};
}
