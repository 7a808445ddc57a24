//! Flow catalog interface.
//!
//! The admin layer owns flow persistence; the runtime reads flow
//! definitions and HTTP route bindings through this trait. A route binding
//! comes from a flow's `http-in` node: its `method`/`path` options plus
//! the flow's enabled flag.
//!
//! [`InMemoryCatalog`] is the bundled implementation for embedding and
//! tests; the server binary seeds it from flow JSON files.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::flow::FlowConfig;

/// Boxed future type used by the object-safe catalog trait.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

#[derive(Debug)]
pub enum CatalogError {
    Backend(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Backend(msg) => write!(f, "catalog backend error: {msg}"),
        }
    }
}

impl std::error::Error for CatalogError {}

/// A route resolution result: which flow, which entry node, full config.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub flow_id: String,
    pub entry_node_id: String,
    pub flow: FlowConfig,
}

/// External store of flow definitions and route bindings.
pub trait FlowCatalog: Send + Sync + 'static {
    /// Exact `(method, path)` lookup over enabled flows.
    fn resolve_route<'a>(
        &'a self,
        method: &'a str,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Option<ResolvedRoute>, CatalogError>>;

    fn fetch_flow<'a>(
        &'a self,
        flow_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<FlowConfig>, CatalogError>>;

    /// Channel on which the catalog announces changed flow ids so shards
    /// can drop cached engines. Optional; route-cache TTL otherwise
    /// catches up.
    fn subscribe_invalidations(&self) -> Option<broadcast::Receiver<String>> {
        None
    }
}

pub type SharedCatalog = Arc<dyn FlowCatalog>;

/// Entry-node type whose options declare the route binding.
const HTTP_IN_TYPE: &str = "http-in";

struct CatalogEntry {
    flow: FlowConfig,
    enabled: bool,
}

/// In-memory catalog for embedding and tests.
pub struct InMemoryCatalog {
    flows: DashMap<String, CatalogEntry>,
    invalidations: broadcast::Sender<String>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        let (invalidations, _) = broadcast::channel(64);
        Self {
            flows: DashMap::new(),
            invalidations,
        }
    }

    /// Insert or replace a flow (enabled). Announces the change.
    pub fn insert_flow(&self, flow: FlowConfig) {
        let id = flow.id.clone();
        self.flows.insert(
            id.clone(),
            CatalogEntry {
                flow,
                enabled: true,
            },
        );
        self.invalidate(&id);
    }

    pub fn remove_flow(&self, flow_id: &str) {
        self.flows.remove(flow_id);
        self.invalidate(flow_id);
    }

    pub fn set_enabled(&self, flow_id: &str, enabled: bool) {
        if let Some(mut entry) = self.flows.get_mut(flow_id) {
            entry.enabled = enabled;
        }
        self.invalidate(flow_id);
    }

    /// Tell listening shards to drop cached engines for a flow.
    pub fn invalidate(&self, flow_id: &str) {
        let _ = self.invalidations.send(flow_id.to_string());
    }

    pub fn flow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.flows.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowCatalog for InMemoryCatalog {
    fn resolve_route<'a>(
        &'a self,
        method: &'a str,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Option<ResolvedRoute>, CatalogError>> {
        Box::pin(async move {
            for entry in self.flows.iter() {
                if !entry.enabled {
                    continue;
                }
                for node in &entry.flow.nodes {
                    if node.node_type != HTTP_IN_TYPE {
                        continue;
                    }
                    let node_path = node.option_str("path").unwrap_or("/");
                    let node_method = node.option_str("method").unwrap_or("GET");
                    if node_path == path && node_method.eq_ignore_ascii_case(method) {
                        return Ok(Some(ResolvedRoute {
                            flow_id: entry.flow.id.clone(),
                            entry_node_id: node.id.clone(),
                            flow: entry.flow.clone(),
                        }));
                    }
                }
            }
            Ok(None)
        })
    }

    fn fetch_flow<'a>(
        &'a self,
        flow_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<FlowConfig>, CatalogError>> {
        Box::pin(async move { Ok(self.flows.get(flow_id).map(|e| e.flow.clone())) })
    }

    fn subscribe_invalidations(&self) -> Option<broadcast::Receiver<String>> {
        Some(self.invalidations.subscribe())
    }
}
