//! Engine and node error types.

use nodeflow_storage::StorageError;

/// A failure inside a node body.
///
/// Contained at the node boundary: the engine logs it, feeds the catch
/// bus, and suppresses downstream routing for that branch only.
#[derive(Debug, Clone)]
pub struct NodeError {
    message: String,
}

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for NodeError {}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::new(err.to_string())
    }
}

impl From<StorageError> for NodeError {
    fn from(err: StorageError) -> Self {
        NodeError::new(err.to_string())
    }
}

/// Failures at the engine boundary (not contained per-node).
#[derive(Debug)]
pub enum EngineError {
    /// The requested entry/target node has no live instance.
    UnknownNode(String),
    /// An `on_init` hook failed; initialisation aborted with the first error.
    InitFailed { node_id: String, message: String },
    /// The engine was closed while the call was pending.
    Closed,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::UnknownNode(id) => write!(f, "unknown node: {id}"),
            EngineError::InitFailed { node_id, message } => {
                write!(f, "node {node_id} failed to initialise: {message}")
            }
            EngineError::Closed => write!(f, "engine is closed"),
        }
    }
}

impl std::error::Error for EngineError {}
