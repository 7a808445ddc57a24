//! Engine behaviour tests: routing, fan-out independence, terminal
//! response selection, error containment, and cycle bounding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    EngineError, EventBus, ExecutionContext, FlowConfig, FlowEngine, HttpResponseOut, Invocation,
    Message, NodeBody, NodeDefinition, NodeError, NodeInstance, NodeOutput, NodeRegistry, Port,
};
use nodeflow_storage::{BatchedStorage, MemoryStorage};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

// ── test node bodies ─────────────────────────────────────────────────────

/// Passes the message through, optionally mutating `payload.tag` first.
struct Tag(Option<&'static str>);

impl NodeBody for Tag {
    fn execute<'a>(
        &'a self,
        _node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        mut msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            if let Some(tag) = self.0 {
                msg.set("payload.tag", json!(tag));
            }
            Ok(NodeOutput::One(msg))
        })
    }
}

/// Records every payload it sees, then mutates its own copy.
#[derive(Clone)]
struct Recorder(Arc<Mutex<Vec<Value>>>);

impl NodeBody for Recorder {
    fn execute<'a>(
        &'a self,
        _node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        mut msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            self.0.lock().unwrap().push(msg.payload.clone());
            // Local mutation must never leak to sibling branches.
            msg.set("payload", json!("clobbered"));
            Ok(NodeOutput::None)
        })
    }
}

/// Fails with a fixed error.
struct Failing;

impl NodeBody for Failing {
    fn execute<'a>(
        &'a self,
        _node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        _msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async { Err(NodeError::new("deliberate failure")) })
    }
}

/// Claims the terminal-response slot with a configured status.
struct Respond;

impl NodeBody for Respond {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        inv: &'a Invocation,
        msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let status = node.config_u64("status").unwrap_or(200) as u16;
            inv.set_response(HttpResponseOut {
                status,
                headers: Vec::new(),
                payload: msg.payload,
            });
            Ok(NodeOutput::None)
        })
    }
}

/// Emits the input on both of its two outputs.
struct TwoPorts;

impl NodeBody for TwoPorts {
    fn execute<'a>(
        &'a self,
        _node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            Ok(NodeOutput::Ports(vec![
                Port::One(msg.clone()),
                Port::One(msg),
            ]))
        })
    }
}

fn registry(recorded: Arc<Mutex<Vec<Value>>>) -> NodeRegistry {
    let registry = NodeRegistry::new();
    registry.register(NodeDefinition::new("tag-a", "test", 1, 1, Tag(Some("A"))));
    registry.register(NodeDefinition::new("tag-b", "test", 1, 1, Tag(Some("B"))));
    registry.register(NodeDefinition::new("pass", "test", 1, 1, Tag(None)));
    registry.register(NodeDefinition::new(
        "record",
        "test",
        1,
        0,
        Recorder(recorded.clone()),
    ));
    registry.register(NodeDefinition::new("fail", "test", 1, 1, Failing));
    registry.register(NodeDefinition::new("respond", "test", 1, 0, Respond));
    registry.register(NodeDefinition::new("two-ports", "test", 1, 2, TwoPorts));
    registry.register(NodeDefinition::new(
        "catch",
        "test",
        0,
        1,
        Tag(None),
    ));
    registry
}

async fn engine_for(flow: Value, registry: &NodeRegistry) -> Arc<FlowEngine> {
    let flow: FlowConfig = serde_json::from_value(flow).unwrap();
    let storage = BatchedStorage::new(Arc::new(MemoryStorage::new()));
    let context = Arc::new(ExecutionContext::new(
        flow.id.clone(),
        storage,
        HashMap::new(),
    ));
    let engine = Arc::new(FlowEngine::new(flow, context));
    engine.initialize(registry).await.unwrap();
    engine
}

async fn trigger(engine: &Arc<FlowEngine>, entry: &str, msg: Message) -> Option<HttpResponseOut> {
    engine
        .trigger(entry, msg, CancellationToken::new())
        .await
        .unwrap()
}

// ── tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_types_are_skipped_and_wires_pruned() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(recorded);
    let engine = engine_for(
        json!({
            "id": "f", "name": "f",
            "nodes": [
                {"id": "in", "type": "pass", "wires": [["ghost", "out"]]},
                {"id": "mystery", "type": "not-registered", "wires": []},
                {"id": "out", "type": "pass", "wires": []}
            ]
        }),
        &registry,
    )
    .await;

    // Only accepted nodes are live, and every surviving wire target is live.
    assert_eq!(engine.node_ids(), vec!["in", "out"]);
    let node = engine.node("in").unwrap();
    assert_eq!(node.wires(), &[vec!["out".to_string()]]);
}

#[tokio::test]
async fn linear_pipeline_delivers_in_order() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(recorded.clone());
    let engine = engine_for(
        json!({
            "id": "f", "name": "f",
            "nodes": [
                {"id": "in", "type": "tag-a", "wires": [["rec"]]},
                {"id": "rec", "type": "record", "wires": []}
            ]
        }),
        &registry,
    )
    .await;

    trigger(&engine, "in", Message::new(json!({"x": 1}))).await;
    let seen = recorded.lock().unwrap();
    assert_eq!(seen.as_slice(), &[json!({"x": 1, "tag": "A"})]);
}

#[tokio::test]
async fn fan_out_targets_get_independent_copies() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(recorded.clone());
    let engine = engine_for(
        json!({
            "id": "f", "name": "f",
            "nodes": [
                {"id": "in", "type": "pass", "wires": [["rec1", "rec2"]]},
                {"id": "rec1", "type": "record", "wires": []},
                {"id": "rec2", "type": "record", "wires": []}
            ]
        }),
        &registry,
    )
    .await;

    trigger(&engine, "in", Message::new(json!({"n": 7}))).await;
    let seen = recorded.lock().unwrap();
    // Both recorders saw the pristine payload even though each recorder
    // clobbers its own copy after recording.
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|v| v == &json!({"n": 7})));
}

#[tokio::test]
async fn branch_routing_by_output_index() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(recorded.clone());
    let engine = engine_for(
        json!({
            "id": "f", "name": "f",
            "nodes": [
                {"id": "in", "type": "two-ports", "wires": [["a"], ["b"]]},
                {"id": "a", "type": "tag-a", "wires": [["rec"]]},
                {"id": "b", "type": "tag-b", "wires": [["rec"]]},
                {"id": "rec", "type": "record", "wires": []}
            ]
        }),
        &registry,
    )
    .await;

    trigger(&engine, "in", Message::new(json!({}))).await;
    let mut tags: Vec<String> = recorded
        .lock()
        .unwrap()
        .iter()
        .map(|v| v["tag"].as_str().unwrap().to_string())
        .collect();
    tags.sort();
    assert_eq!(tags, vec!["A", "B"]);
}

#[tokio::test]
async fn terminal_response_returned_from_trigger() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(recorded);
    let engine = engine_for(
        json!({
            "id": "f", "name": "f",
            "nodes": [
                {"id": "in", "type": "pass", "wires": [["out"]]},
                {"id": "out", "type": "respond", "status": 201, "wires": []}
            ]
        }),
        &registry,
    )
    .await;

    let response = trigger(&engine, "in", Message::new(json!("body"))).await.unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.payload, json!("body"));
}

#[tokio::test]
async fn exactly_one_descriptor_wins_under_fan_out() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(recorded);
    let engine = engine_for(
        json!({
            "id": "f", "name": "f",
            "nodes": [
                {"id": "in", "type": "pass", "wires": [["r1", "r2"]]},
                {"id": "r1", "type": "respond", "status": 200, "wires": []},
                {"id": "r2", "type": "respond", "status": 500, "wires": []}
            ]
        }),
        &registry,
    )
    .await;

    let response = trigger(&engine, "in", Message::new(json!(1))).await.unwrap();
    // One of the two, never a mixture.
    assert!(response.status == 200 || response.status == 500);
}

#[tokio::test]
async fn node_error_does_not_fail_siblings_or_trigger() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(recorded.clone());
    let engine = engine_for(
        json!({
            "id": "f", "name": "f",
            "nodes": [
                {"id": "in", "type": "pass", "wires": [["bad", "good"]]},
                {"id": "bad", "type": "fail", "wires": [["rec"]]},
                {"id": "good", "type": "tag-a", "wires": [["rec"]]},
                {"id": "rec", "type": "record", "wires": []}
            ]
        }),
        &registry,
    )
    .await;

    trigger(&engine, "in", Message::new(json!({}))).await;
    let seen = recorded.lock().unwrap();
    // The failing branch routed nothing; the sibling ran to completion.
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["tag"], json!("A"));
}

#[tokio::test]
async fn catch_node_receives_the_error_record() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(recorded.clone());
    let engine = engine_for(
        json!({
            "id": "f", "name": "f",
            "nodes": [
                {"id": "in", "type": "pass", "wires": [["bad"]]},
                {"id": "bad", "type": "fail", "wires": []},
                {"id": "trap", "type": "catch", "wires": [["rec"]]},
                {"id": "rec", "type": "record", "wires": []}
            ]
        }),
        &registry,
    )
    .await;

    let mut events = engine.bus().subscribe();
    trigger(&engine, "in", Message::new(json!("x"))).await;

    // The catch branch ran: the recorder saw the offending payload.
    assert_eq!(recorded.lock().unwrap().len(), 1);
    match events.try_recv().unwrap() {
        nodeflow_core::FlowEvent::Error { source, message, .. } => {
            assert_eq!(source.id, "bad");
            assert!(message.contains("deliberate failure"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn cycles_are_bounded_by_the_trigger_budget() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(recorded);
    let flow: FlowConfig = serde_json::from_value(json!({
        "id": "f", "name": "f",
        "nodes": [
            {"id": "loop", "type": "pass", "wires": [["loop"]]}
        ]
    }))
    .unwrap();
    let storage = BatchedStorage::new(Arc::new(MemoryStorage::new()));
    let context = Arc::new(ExecutionContext::new("f", storage, HashMap::new()));
    let engine = Arc::new(FlowEngine::new(flow, context).with_trigger_budget(25));
    engine.initialize(&registry).await.unwrap();

    // Terminates despite the self-loop.
    let response = trigger(&engine, "loop", Message::new(json!(0))).await;
    assert!(response.is_none());
}

#[tokio::test]
async fn trigger_on_unknown_entry_is_an_error() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(recorded);
    let engine = engine_for(
        json!({"id": "f", "name": "f", "nodes": [{"id": "in", "type": "pass", "wires": []}]}),
        &registry,
    )
    .await;

    let err = engine
        .trigger("missing", Message::new(json!(1)), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownNode(id) if id == "missing"));
}

#[tokio::test]
async fn closed_engine_rejects_triggers() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(recorded);
    let engine = engine_for(
        json!({"id": "f", "name": "f", "nodes": [{"id": "in", "type": "pass", "wires": []}]}),
        &registry,
    )
    .await;

    engine.close().await;
    let err = engine
        .trigger("in", Message::new(json!(1)), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Closed));
}

#[tokio::test]
async fn execute_node_routes_downstream_and_returns_output() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(recorded.clone());
    let engine = engine_for(
        json!({
            "id": "f", "name": "f",
            "nodes": [
                {"id": "a", "type": "tag-a", "wires": [["rec"]]},
                {"id": "rec", "type": "record", "wires": []}
            ]
        }),
        &registry,
    )
    .await;

    let output = engine
        .execute_node("a", Message::new(json!({})))
        .await
        .unwrap();
    assert!(matches!(output, NodeOutput::One(_)));
    assert_eq!(recorded.lock().unwrap().len(), 1);
}

// EventBus is re-exported for embedders; keep the import exercised.
#[test]
fn event_bus_is_constructible() {
    let _ = EventBus::new();
}
