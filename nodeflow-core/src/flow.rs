//! Flow configuration — the persisted flow JSON.
//!
//! A flow is a directed graph: an ordered list of node configurations,
//! each carrying per-output wire arrays (`wires[output_index]` is the list
//! of target node ids). Flow JSON doubles as the export/import format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::registry::NodeRegistry;

/// One node of a flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub wires: Vec<Vec<String>>,
    /// Type-specific options (all unknown JSON keys).
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

/// A complete flow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// Structural problems in a flow definition.
#[derive(Debug, PartialEq)]
pub enum FlowConfigError {
    DuplicateNodeId(String),
    DanglingWire { source: String, target: String },
    TooManyOutputs { node: String, declared: usize, wired: usize },
}

impl std::fmt::Display for FlowConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowConfigError::DuplicateNodeId(id) => write!(f, "duplicate node id: {id}"),
            FlowConfigError::DanglingWire { source, target } => {
                write!(f, "wire from {source} targets unknown node {target}")
            }
            FlowConfigError::TooManyOutputs {
                node,
                declared,
                wired,
            } => write!(
                f,
                "node {node} wires {wired} outputs but its type declares {declared}"
            ),
        }
    }
}

impl std::error::Error for FlowConfigError {}

impl FlowConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Structural validation: unique ids, no dangling wires, and (for node
    /// types known to `registry`) no more wire arrays than declared outputs.
    pub fn validate(&self, registry: &NodeRegistry) -> Vec<FlowConfigError> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                errors.push(FlowConfigError::DuplicateNodeId(node.id.clone()));
            }
        }

        for node in &self.nodes {
            for targets in &node.wires {
                for target in targets {
                    if !seen.contains(target.as_str()) {
                        errors.push(FlowConfigError::DanglingWire {
                            source: node.id.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
            if let Some(def) = registry.get(&node.node_type) {
                let declared = def.body.outputs(node, def.outputs);
                if node.wires.len() > declared {
                    errors.push(FlowConfigError::TooManyOutputs {
                        node: node.id.clone(),
                        declared,
                        wired: node.wires.len(),
                    });
                }
            }
        }
        errors
    }
}

impl NodeConfig {
    /// Option accessor with dotted-key passthrough.
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(Value::as_u64)
    }

    pub fn option_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(Value::as_bool)
    }
}
