//! Flow engine — evaluates a graph given an entry node and a message.
//!
//! One engine per (shard, flow). `initialize()` builds node instances,
//! `trigger()` runs the graph with concurrent fan-out, `close()` drains
//! in-flight work and runs teardown hooks.
//!
//! # Fan-out
//!
//! Each wire delivery becomes a spawned branch task holding a deep copy of
//! the message. A branch resolves only after everything it transitively
//! spawned has resolved, so `trigger` returning means the whole graph is
//! quiescent. Branches share the node instances and shard storage; they
//! communicate only through storage and the per-trigger [`Invocation`].
//!
//! # Error containment
//!
//! A failing node body suppresses its own downstream routing, feeds the
//! flow's `catch` nodes, and leaves sibling branches untouched. Errors
//! never fail the overall `trigger`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::context::ExecutionContext;
use crate::error::{EngineError, NodeError};
use crate::events::{EventBus, FlowEvent};
use crate::flow::FlowConfig;
use crate::message::{ErrorInfo, HttpResponseOut, Message, NodeRef};
use crate::node::{NodeInstance, NodeStatus};
use crate::registry::{NodeDefinition, NodeRegistry};

/// Node types wired to the error and status event streams.
pub const CATCH_TYPE: &str = "catch";
pub const STATUS_TYPE: &str = "status";

/// Per-trigger execution ceiling. Wiring permits cycles; the budget keeps
/// a runaway loop from monopolising the shard.
pub const DEFAULT_TRIGGER_BUDGET: i64 = 10_000;

// ── Node output ──────────────────────────────────────────────────────────

/// What one output port produced in a single invocation.
#[derive(Debug, Clone)]
pub enum Port {
    /// No message on this port this invocation.
    Empty,
    One(Message),
    /// Multiple messages fanning out through the same port.
    Many(Vec<Message>),
}

/// A node body's return value.
#[derive(Debug, Clone)]
pub enum NodeOutput {
    /// The message was consumed; nothing is routed.
    None,
    /// Routed to every wire of output 0.
    One(Message),
    /// Element `i` is routed to the wires of output `i`.
    Ports(Vec<Port>),
}

impl NodeOutput {
    /// Flatten into per-port message lists, clamped to `outputs`.
    fn into_ports(self, outputs: usize) -> Vec<Vec<Message>> {
        let mut ports = vec![Vec::new(); outputs];
        match self {
            NodeOutput::None => {}
            NodeOutput::One(msg) => {
                if outputs > 0 {
                    ports[0].push(msg);
                }
            }
            NodeOutput::Ports(produced) => {
                for (i, port) in produced.into_iter().enumerate() {
                    if i >= outputs {
                        break;
                    }
                    match port {
                        Port::Empty => {}
                        Port::One(msg) => ports[i].push(msg),
                        Port::Many(msgs) => ports[i].extend(msgs),
                    }
                }
            }
        }
        ports
    }
}

impl From<Message> for NodeOutput {
    fn from(msg: Message) -> Self {
        NodeOutput::One(msg)
    }
}

impl From<Option<Message>> for NodeOutput {
    fn from(msg: Option<Message>) -> Self {
        match msg {
            Some(msg) => NodeOutput::One(msg),
            None => NodeOutput::None,
        }
    }
}

// ── Invocation ───────────────────────────────────────────────────────────

/// Shared state of one `trigger` call, visible to node bodies.
///
/// Carries the terminal-response slot, the cancellation token inherited
/// from the HTTP caller, and the remaining execution budget.
pub struct Invocation {
    response: Mutex<Option<HttpResponseOut>>,
    cancel: CancellationToken,
    remaining: AtomicI64,
}

impl Invocation {
    pub fn new(cancel: CancellationToken, budget: i64) -> Self {
        Self {
            response: Mutex::new(None),
            cancel,
            remaining: AtomicI64::new(budget),
        }
    }

    /// Claim the terminal-response slot. First writer wins; the decision is
    /// serialised so concurrent branches can never interleave descriptors.
    /// Returns whether this call stored the descriptor.
    pub fn set_response(&self, response: HttpResponseOut) -> bool {
        let mut slot = self.response.lock().unwrap();
        if slot.is_none() {
            *slot = Some(response);
            true
        } else {
            false
        }
    }

    pub fn response(&self) -> Option<HttpResponseOut> {
        self.response.lock().unwrap().clone()
    }

    fn take_response(&self) -> Option<HttpResponseOut> {
        self.response.lock().unwrap().take()
    }

    /// Cancellation inherited from the caller. Cooperative node bodies
    /// (delay, outbound I/O) select against it.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn try_consume_budget(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::Relaxed) > 0
    }
}

// ── Engine ───────────────────────────────────────────────────────────────

struct Inner {
    nodes: HashMap<String, Arc<NodeInstance>>,
    defs: HashMap<String, Arc<NodeDefinition>>,
    /// Node ids in configuration order, for deterministic hook sequencing.
    order: Vec<String>,
    catch_nodes: Vec<String>,
    status_nodes: Vec<String>,
}

impl Inner {
    fn empty() -> Self {
        Self {
            nodes: HashMap::new(),
            defs: HashMap::new(),
            order: Vec::new(),
            catch_nodes: Vec::new(),
            status_nodes: Vec::new(),
        }
    }
}

/// Interpreter for one flow graph.
pub struct FlowEngine {
    flow: FlowConfig,
    context: Arc<ExecutionContext>,
    bus: EventBus,
    inner: RwLock<Inner>,
    budget: i64,
    closed: AtomicBool,
    active: AtomicUsize,
    drained: Notify,
}

impl FlowEngine {
    pub fn new(flow: FlowConfig, context: Arc<ExecutionContext>) -> Self {
        Self {
            flow,
            context,
            bus: EventBus::new(),
            inner: RwLock::new(Inner::empty()),
            budget: DEFAULT_TRIGGER_BUDGET,
            closed: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    pub fn with_trigger_budget(mut self, budget: i64) -> Self {
        self.budget = budget;
        self
    }

    pub fn flow(&self) -> &FlowConfig {
        &self.flow
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Ids of currently live node instances.
    pub fn node_ids(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        let mut ids: Vec<String> = inner.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn node(&self, node_id: &str) -> Option<Arc<NodeInstance>> {
        self.inner.read().unwrap().nodes.get(node_id).cloned()
    }

    /// Build one instance per node configuration with a registered type,
    /// then run every definition's `on_init` hook in configuration order.
    /// Unknown types are logged and skipped; wires pointing at skipped
    /// nodes are pruned so every surviving target is live.
    pub async fn initialize(&self, registry: &NodeRegistry) -> Result<(), EngineError> {
        let mut staged: Vec<(NodeInstance, Arc<NodeDefinition>)> = Vec::new();
        for config in &self.flow.nodes {
            match registry.get(&config.node_type) {
                Some(def) => {
                    let instance = NodeInstance::new(config, &def, self.bus.clone());
                    staged.push((instance, def));
                }
                None => {
                    tracing::warn!(
                        flow_id = %self.flow.id,
                        node_id = %config.id,
                        node_type = %config.node_type,
                        "unknown node type, skipping node"
                    );
                }
            }
        }

        let live: std::collections::HashSet<String> =
            staged.iter().map(|(n, _)| n.id().to_string()).collect();
        for (instance, _) in &mut staged {
            let before: usize = instance.wires().iter().map(Vec::len).sum();
            instance.retain_wire_targets(|target| live.contains(target));
            let after: usize = instance.wires().iter().map(Vec::len).sum();
            if after < before {
                tracing::warn!(
                    flow_id = %self.flow.id,
                    node_id = %instance.id(),
                    "pruned wires to skipped nodes"
                );
            }
        }

        {
            let mut inner = self.inner.write().unwrap();
            *inner = Inner::empty();
            for (instance, def) in staged {
                let id = instance.id().to_string();
                if def.node_type == CATCH_TYPE {
                    inner.catch_nodes.push(id.clone());
                }
                if def.node_type == STATUS_TYPE {
                    inner.status_nodes.push(id.clone());
                }
                inner.order.push(id.clone());
                inner.defs.insert(id.clone(), def);
                inner.nodes.insert(id, Arc::new(instance));
            }
        }

        let order = self.inner.read().unwrap().order.clone();
        for node_id in order {
            let (node, def) = match self.lookup(&node_id) {
                Some(pair) => pair,
                None => continue,
            };
            if let Err(err) = def.body.on_init(&node, &self.context).await {
                *self.inner.write().unwrap() = Inner::empty();
                return Err(EngineError::InitFailed {
                    node_id,
                    message: err.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Run the graph from `entry_node_id`. Returns the terminal HTTP
    /// response captured during execution, if any node produced one.
    pub async fn trigger(
        self: &Arc<Self>,
        entry_node_id: &str,
        msg: Message,
        cancel: CancellationToken,
    ) -> Result<Option<HttpResponseOut>, EngineError> {
        let _guard = self.enter()?;
        if self.node(entry_node_id).is_none() {
            return Err(EngineError::UnknownNode(entry_node_id.to_string()));
        }

        let inv = Arc::new(Invocation::new(cancel, self.budget));
        let listener = self.spawn_status_listener(&inv);

        self.execute_with(&inv, entry_node_id, msg).await;

        listener.stop.cancel();
        let _ = listener.handle.await;

        Ok(inv.take_response())
    }

    /// Execute one node, apply routing to its output, and return the
    /// output. Node failures are contained (logged, offered to `catch`)
    /// and surface as [`NodeOutput::None`].
    pub async fn execute_node(
        self: &Arc<Self>,
        node_id: &str,
        msg: Message,
    ) -> Result<NodeOutput, EngineError> {
        let _guard = self.enter()?;
        if self.node(node_id).is_none() {
            return Err(EngineError::UnknownNode(node_id.to_string()));
        }
        let inv = Arc::new(Invocation::new(CancellationToken::new(), self.budget));
        let listener = self.spawn_status_listener(&inv);
        let output = self.execute_with(&inv, node_id, msg).await;
        listener.stop.cancel();
        let _ = listener.handle.await;
        Ok(output)
    }

    /// Await in-flight executions, run `on_close` hooks, drop instances.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        loop {
            // Register interest before the emptiness check so a concurrent
            // final decrement cannot slip between check and wait.
            let drained = self.drained.notified();
            if self.active.load(Ordering::SeqCst) == 0 {
                break;
            }
            drained.await;
        }

        let order = self.inner.read().unwrap().order.clone();
        for node_id in order {
            if let Some((node, def)) = self.lookup(&node_id) {
                if let Err(err) = def.body.on_close(&node, &self.context).await {
                    tracing::warn!(node_id = %node_id, error = %err, "on_close hook failed");
                }
            }
        }
        *self.inner.write().unwrap() = Inner::empty();
    }

    // ── internals ────────────────────────────────────────────────────────

    fn lookup(&self, node_id: &str) -> Option<(Arc<NodeInstance>, Arc<NodeDefinition>)> {
        let inner = self.inner.read().unwrap();
        let node = inner.nodes.get(node_id)?.clone();
        let def = inner.defs.get(node_id)?.clone();
        Some((node, def))
    }

    fn enter(&self) -> Result<ActiveGuard<'_>, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(ActiveGuard { engine: self })
    }

    /// Execute `node_id`, route the output, await all spawned branches.
    async fn execute_with(
        self: &Arc<Self>,
        inv: &Arc<Invocation>,
        node_id: &str,
        msg: Message,
    ) -> NodeOutput {
        if inv.is_cancelled() {
            return NodeOutput::None;
        }
        if !inv.try_consume_budget() {
            tracing::warn!(
                flow_id = %self.flow.id,
                node_id = %node_id,
                "trigger execution budget exhausted, cancelling remaining branches"
            );
            inv.cancel_token().cancel();
            return NodeOutput::None;
        }

        let (node, def) = match self.lookup(node_id) {
            Some(pair) => pair,
            None => {
                tracing::warn!(node_id = %node_id, "message routed to missing node");
                return NodeOutput::None;
            }
        };

        let output = match def.body.execute(&node, &self.context, inv, msg.clone()).await {
            Ok(output) => output,
            Err(err) => {
                self.contain_error(inv, &node, &err, msg).await;
                return NodeOutput::None;
            }
        };

        self.route(inv, &node, output.clone()).await;
        output
    }

    /// Deliver an output to the source node's wires. Every delivery is a
    /// spawned task holding its own deep copy; the call returns once every
    /// transitively spawned branch has resolved.
    async fn route(self: &Arc<Self>, inv: &Arc<Invocation>, source: &NodeInstance, output: NodeOutput) {
        let ports = output.into_ports(source.outputs().max(source.wires().len()));
        let mut branches = Vec::new();
        for (index, messages) in ports.into_iter().enumerate() {
            let Some(targets) = source.wires().get(index) else {
                continue;
            };
            for message in messages {
                for target in targets {
                    let engine = self.clone();
                    let inv = inv.clone();
                    let target = target.clone();
                    let copy = message.clone();
                    branches.push(tokio::spawn(engine.run_branch(inv, target, copy)));
                }
            }
        }
        for branch in branches {
            let _ = branch.await;
        }
    }

    /// Boxed branch future; boxing breaks the recursive future type the
    /// spawn-inside-route cycle would otherwise create.
    fn run_branch(
        self: Arc<Self>,
        inv: Arc<Invocation>,
        node_id: String,
        msg: Message,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let _ = self.execute_with(&inv, &node_id, msg).await;
        })
    }

    /// Per-node error containment: log, emit on the error bus, hand a
    /// synthetic error message to the flow's `catch` nodes. The failing
    /// branch routes nothing further; siblings are unaffected.
    async fn contain_error(
        self: &Arc<Self>,
        inv: &Arc<Invocation>,
        node: &Arc<NodeInstance>,
        err: &NodeError,
        msg: Message,
    ) {
        tracing::error!(
            flow_id = %self.flow.id,
            node_id = %node.id(),
            node_type = %node.node_type(),
            msg_id = %msg.id,
            error = %err,
            "node execution failed"
        );
        self.bus.emit(FlowEvent::Error {
            source: node.node_ref(),
            message: err.to_string(),
            msg: Box::new(msg.clone()),
        });

        let catch_nodes = self.inner.read().unwrap().catch_nodes.clone();
        // A failing catch node never re-enters the catch path.
        if catch_nodes.iter().any(|id| id == node.id()) {
            return;
        }
        let mut error_msg = msg;
        error_msg.error = Some(ErrorInfo {
            message: err.to_string(),
            source: Some(node.node_ref()),
            stack: None,
        });

        let mut branches = Vec::new();
        for catch_id in catch_nodes {
            let engine = self.clone();
            branches.push(tokio::spawn(engine.run_branch(
                inv.clone(),
                catch_id,
                error_msg.clone(),
            )));
        }
        for branch in branches {
            let _ = branch.await;
        }
    }

    /// Listen for status events during a trigger and feed `status` nodes.
    fn spawn_status_listener(self: &Arc<Self>, inv: &Arc<Invocation>) -> StatusListener {
        let stop = CancellationToken::new();
        let engine = self.clone();
        let inv = inv.clone();
        let stop_inner = stop.clone();
        // Subscribe before spawning so no status write can slip in between
        // the first node execution and the listener coming up.
        let mut rx = self.bus.subscribe();
        let handle = tokio::spawn(async move {
            let mut branches = Vec::new();
            loop {
                tokio::select! {
                    _ = stop_inner.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => engine.dispatch_status(&inv, event, &mut branches),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            // Drain events emitted just before the stop signal.
            while let Ok(event) = rx.try_recv() {
                engine.dispatch_status(&inv, event, &mut branches);
            }
            for branch in branches {
                let _ = branch.await;
            }
        });
        StatusListener { stop, handle }
    }

    fn dispatch_status(
        self: &Arc<Self>,
        inv: &Arc<Invocation>,
        event: FlowEvent,
        branches: &mut Vec<tokio::task::JoinHandle<()>>,
    ) {
        let FlowEvent::Status { source, status } = event else {
            return;
        };
        let status_nodes = self.inner.read().unwrap().status_nodes.clone();
        for status_id in status_nodes {
            if status_id == source.id {
                continue;
            }
            let msg = status_message(&source, &status);
            branches.push(tokio::spawn(self.clone().run_branch(
                inv.clone(),
                status_id,
                msg,
            )));
        }
    }
}

struct StatusListener {
    stop: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

struct ActiveGuard<'a> {
    engine: &'a FlowEngine,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if self.engine.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.engine.drained.notify_waiters();
        }
    }
}

/// Synthetic message delivered to `status` nodes.
fn status_message(source: &NodeRef, status: &NodeStatus) -> Message {
    let mut msg = Message::new(json!({
        "text": status.text,
        "level": status.level,
    }))
    .with_topic("status");
    msg.extra.insert(
        "source".to_string(),
        serde_json::to_value(source).unwrap_or(serde_json::Value::Null),
    );
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str) -> Message {
        let mut m = Message::new(json!(1));
        m.id = id.to_string();
        m
    }

    #[test]
    fn one_output_routes_to_port_zero() {
        let ports = NodeOutput::One(msg("a")).into_ports(2);
        assert_eq!(ports[0].len(), 1);
        assert!(ports[1].is_empty());
    }

    #[test]
    fn ports_map_by_index_and_clamp() {
        let output = NodeOutput::Ports(vec![
            Port::Empty,
            Port::Many(vec![msg("a"), msg("b")]),
            Port::One(msg("c")),
        ]);
        let ports = output.into_ports(2);
        assert!(ports[0].is_empty());
        assert_eq!(ports[1].len(), 2);
    }

    #[test]
    fn none_routes_nothing() {
        let ports = NodeOutput::None.into_ports(3);
        assert!(ports.iter().all(Vec::is_empty));
    }

    #[test]
    fn response_slot_first_writer_wins() {
        let inv = Invocation::new(CancellationToken::new(), 10);
        let first = HttpResponseOut {
            status: 200,
            headers: Vec::new(),
            payload: json!("first"),
        };
        let second = HttpResponseOut {
            status: 500,
            headers: Vec::new(),
            payload: json!("second"),
        };
        assert!(inv.set_response(first.clone()));
        assert!(!inv.set_response(second));
        assert_eq!(inv.response(), Some(first));
    }

    #[test]
    fn budget_exhaustion() {
        let inv = Invocation::new(CancellationToken::new(), 2);
        assert!(inv.try_consume_budget());
        assert!(inv.try_consume_budget());
        assert!(!inv.try_consume_budget());
    }
}
