//! Process-wide node registry.
//!
//! Maps a node type tag to its [`NodeDefinition`]. Registration happens at
//! startup before any engine initialises; lookups are read-only and safe
//! under concurrent readers. Last writer wins on re-registration.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::engine::{Invocation, NodeOutput};
use crate::error::NodeError;
use crate::flow::NodeConfig;
use crate::message::Message;
use crate::node::NodeInstance;

/// Boxed future type used by the object-safe node body trait.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// The runtime behaviour of a node type.
///
/// `execute` is the hot path; the lifecycle hooks default to no-ops.
pub trait NodeBody: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        ctx: &'a ExecutionContext,
        inv: &'a Invocation,
        msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>>;

    /// Called once per instance before any traffic flows.
    fn on_init<'a>(
        &'a self,
        _node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<(), NodeError>> {
        Box::pin(async { Ok(()) })
    }

    /// Called once per instance when the engine closes.
    fn on_close<'a>(
        &'a self,
        _node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<(), NodeError>> {
        Box::pin(async { Ok(()) })
    }

    /// Effective output count for a concrete configuration. Types with a
    /// config-driven output count (`switch` rules, `function` outputs)
    /// override this.
    fn outputs(&self, _config: &NodeConfig, declared: usize) -> usize {
        declared
    }
}

/// Editor-facing metadata carried by a definition.
#[derive(Debug, Clone, Serialize, Default)]
pub struct NodeUi {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub palette_label: Option<String>,
    /// Property schema rendered by the editor's property panel.
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub properties: Value,
}

/// A registered node type.
pub struct NodeDefinition {
    pub node_type: String,
    pub category: String,
    pub inputs: usize,
    pub outputs: usize,
    /// Default option values merged under the per-node configuration.
    pub defaults: Value,
    pub ui: NodeUi,
    pub body: Arc<dyn NodeBody>,
}

impl NodeDefinition {
    pub fn new(
        node_type: impl Into<String>,
        category: impl Into<String>,
        inputs: usize,
        outputs: usize,
        body: impl NodeBody,
    ) -> Self {
        Self {
            node_type: node_type.into(),
            category: category.into(),
            inputs,
            outputs,
            defaults: Value::Null,
            ui: NodeUi::default(),
            body: Arc::new(body),
        }
    }

    pub fn with_defaults(mut self, defaults: Value) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_ui(mut self, ui: NodeUi) -> Self {
        self.ui = ui;
        self
    }

    pub fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            node_type: self.node_type.clone(),
            category: self.category.clone(),
            inputs: self.inputs,
            outputs: self.outputs,
            defaults: self.defaults.clone(),
            ui: self.ui.clone(),
        }
    }
}

/// Discovery-endpoint view of a definition (`GET /nodes`).
#[derive(Debug, Clone, Serialize)]
pub struct NodeDescriptor {
    #[serde(rename = "type")]
    pub node_type: String,
    pub category: String,
    pub inputs: usize,
    pub outputs: usize,
    pub defaults: Value,
    pub ui: NodeUi,
}

/// Associative container `type → definition`.
pub struct NodeRegistry {
    inner: DashMap<String, Arc<NodeDefinition>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Register a definition. Idempotent overwrite; last writer wins.
    pub fn register(&self, def: NodeDefinition) {
        self.inner.insert(def.node_type.clone(), Arc::new(def));
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<NodeDefinition>> {
        self.inner.get(node_type).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<String> {
        let mut types: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    /// Descriptors for the discovery endpoint, sorted by type tag.
    pub fn descriptors(&self) -> Vec<NodeDescriptor> {
        let mut all: Vec<NodeDescriptor> =
            self.inner.iter().map(|e| e.value().descriptor()).collect();
        all.sort_by(|a, b| a.node_type.cmp(&b.node_type));
        all
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_REGISTRY: OnceLock<NodeRegistry> = OnceLock::new();

/// The process-global registry used by the runtime.
pub fn global_registry() -> &'static NodeRegistry {
    GLOBAL_REGISTRY.get_or_init(NodeRegistry::new)
}
