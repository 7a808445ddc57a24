//! Intra-flow event bus.
//!
//! One bus per engine. Node errors and status updates are emitted here;
//! during a trigger the engine subscribes and dispatches events to the
//! flow's `catch` and `status` nodes, and the executor relays them to the
//! shard's WebSocket clients.

use tokio::sync::broadcast;

use crate::message::{Message, NodeRef};
use crate::node::NodeStatus;

const BUS_CAPACITY: usize = 256;

/// Events observable inside one flow.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// A node body failed. Carries the offending message.
    Error {
        source: NodeRef,
        message: String,
        msg: Box<Message>,
    },
    /// A node wrote its status descriptor.
    Status { source: NodeRef, status: NodeStatus },
}

/// Clonable pub/sub handle (`emit`/`subscribe`).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Emit an event. Lossy when nobody listens, which is fine: events are
    /// advisory and the engine handles error containment out of band.
    pub fn emit(&self, event: FlowEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
