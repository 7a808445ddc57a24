pub mod catalog;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod flow;
pub mod message;
pub mod node;
pub mod paths;
pub mod registry;

pub use catalog::{CatalogError, FlowCatalog, InMemoryCatalog, ResolvedRoute, SharedCatalog};
pub use context::{ExecutionContext, ScopedKv};
pub use engine::{FlowEngine, Invocation, NodeOutput, Port};
pub use error::{EngineError, NodeError};
pub use events::{EventBus, FlowEvent};
pub use flow::{FlowConfig, FlowConfigError, NodeConfig};
pub use message::{ErrorInfo, HttpResponseOut, Message, NodeRef, Parts, PartsKind};
pub use node::{NodeInstance, NodeStatus, StatusLevel};
pub use registry::{global_registry, NodeBody, NodeDefinition, NodeDescriptor, NodeRegistry, NodeUi};
