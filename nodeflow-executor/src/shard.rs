//! The shard actor.
//!
//! [`spawn`] starts one executor task per shard identity and hands back a
//! clonable [`ShardHandle`]. Everything that touches shard state — flow
//! triggers, alarm ticks, control-plane calls, catalog invalidations —
//! goes through the actor's inbox and observes a single sequential
//! history. Storage is flushed at the end of every inbox turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use nodeflow_core::{
    ExecutionContext, FlowConfig, FlowEngine, Message, NodeRegistry, ResolvedRoute, SharedCatalog,
};
use nodeflow_storage::{keys, BatchedStorage, SharedStorage};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::ExecutorConfig;
use crate::rate_limit::{self, Admission};
use crate::response::{self, ResponseBody, ShardResponse};
use crate::routes::RouteResolver;
use crate::scheduler;

/// Sharding dimension chosen by the front-door.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardKind {
    Session,
    User,
    Workspace,
    Job,
    Global,
}

impl ShardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardKind::Session => "session",
            ShardKind::User => "user",
            ShardKind::Workspace => "workspace",
            ShardKind::Job => "job",
            ShardKind::Global => "global",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session" => Some(ShardKind::Session),
            "user" => Some(ShardKind::User),
            "workspace" => Some(ShardKind::Workspace),
            "job" => Some(ShardKind::Job),
            "global" => Some(ShardKind::Global),
            _ => None,
        }
    }
}

/// Shard identity: dimension plus key (`session:<id>`, `global`, …).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardId {
    pub kind: ShardKind,
    pub key: String,
}

impl ShardId {
    pub fn new(kind: ShardKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    pub fn global() -> Self {
        Self::new(ShardKind::Global, "global")
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.kind == ShardKind::Global {
            write!(f, "global")
        } else {
            write!(f, "{}:{}", self.kind.as_str(), self.key)
        }
    }
}

/// One inbound request, already classified by the front-door.
#[derive(Debug)]
pub struct ShardRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub cancel: CancellationToken,
}

impl ShardRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: HashMap::new(),
            headers: Vec::new(),
            body: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }
}

enum ShardMessage {
    Request {
        request: ShardRequest,
        reply: oneshot::Sender<ShardResponse>,
    },
    /// Job submission: run to completion, persist the outcome, reply to
    /// nobody.
    FireAndForget { request: ShardRequest },
    Alarm,
    InvalidateFlow { flow_id: String },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<Value>>,
    },
}

/// Clonable mailbox address of one shard actor.
#[derive(Clone)]
pub struct ShardHandle {
    id: ShardId,
    tx: mpsc::Sender<ShardMessage>,
}

impl ShardHandle {
    pub fn id(&self) -> &ShardId {
        &self.id
    }

    /// Dispatch a request and await the shard's response.
    pub async fn handle(&self, request: ShardRequest) -> ShardResponse {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(ShardMessage::Request { request, reply })
            .await
            .is_err()
        {
            return response::internal_error("shard actor is gone", 0);
        }
        rx.await
            .unwrap_or_else(|_| response::internal_error("shard actor dropped the request", 0))
    }

    /// Submit a fire-and-forget job run.
    pub async fn fire(&self, request: ShardRequest) {
        let _ = self.tx.send(ShardMessage::FireAndForget { request }).await;
    }

    /// Subscribe to the shard's WebSocket event stream.
    pub async fn subscribe(&self) -> Option<broadcast::Receiver<Value>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(ShardMessage::Subscribe { reply }).await.ok()?;
        rx.await.ok()
    }
}

/// Start the actor for one shard.
pub(crate) fn spawn(
    id: ShardId,
    config: ExecutorConfig,
    catalog: SharedCatalog,
    registry: Arc<NodeRegistry>,
    backend: SharedStorage,
    env: HashMap<String, String>,
) -> ShardHandle {
    let (tx, rx) = mpsc::channel(64);
    let storage = BatchedStorage::with_flush_interval(backend, config.flush_interval);
    let (events, _) = broadcast::channel(64);

    // Forward catalog invalidations into the inbox.
    if let Some(mut invalidations) = catalog.subscribe_invalidations() {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Ok(flow_id) = invalidations.recv().await {
                if tx
                    .send(ShardMessage::InvalidateFlow { flow_id })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    let resolver = RouteResolver::new(config.api_prefix.clone(), config.route_ttl);
    let mut executor = ShardExecutor {
        id: id.clone(),
        config,
        catalog,
        registry,
        env,
        storage,
        engines: HashMap::new(),
        resolver,
        events,
        last_activity_ms: Utc::now().timestamp_millis(),
        alarm_task: None,
        self_tx: tx.clone(),
    };

    tokio::spawn(async move {
        executor.arm_alarm(executor.config.alarm_interval).await;
        executor.run(rx).await;
    });

    ShardHandle { id, tx }
}

pub(crate) struct ShardExecutor {
    pub(crate) id: ShardId,
    pub(crate) config: ExecutorConfig,
    pub(crate) catalog: SharedCatalog,
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) env: HashMap<String, String>,
    pub(crate) storage: BatchedStorage,
    pub(crate) engines: HashMap<String, Arc<FlowEngine>>,
    pub(crate) resolver: RouteResolver,
    pub(crate) events: broadcast::Sender<Value>,
    pub(crate) last_activity_ms: i64,
    alarm_task: Option<tokio::task::JoinHandle<()>>,
    self_tx: mpsc::Sender<ShardMessage>,
}

impl ShardExecutor {
    async fn run(mut self, mut rx: mpsc::Receiver<ShardMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                ShardMessage::Request { request, reply } => {
                    let response = self.handle_request(request).await;
                    let _ = reply.send(response);
                }
                ShardMessage::FireAndForget { request } => self.handle_job(request).await,
                ShardMessage::Alarm => scheduler::on_alarm(&mut self).await,
                ShardMessage::InvalidateFlow { flow_id } => self.invalidate_flow(&flow_id).await,
                ShardMessage::Subscribe { reply } => {
                    let _ = reply.send(self.events.subscribe());
                }
            }
            // Shard-boundary flush: every turn ends with durable state.
            if let Err(err) = self.storage.flush().await {
                tracing::warn!(shard = %self.id, error = %err, "boundary flush failed");
            }
        }
    }

    /// Arm the alarm: persist the wake time and start the timer feeding
    /// the inbox.
    pub(crate) async fn arm_alarm(&mut self, delay: Duration) {
        let wake_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        if let Err(err) = self.storage.backend().set_alarm(wake_at).await {
            tracing::warn!(shard = %self.id, error = %err, "failed to persist alarm");
        }
        if let Some(task) = self.alarm_task.take() {
            task.abort();
        }
        let tx = self.self_tx.clone();
        self.alarm_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ShardMessage::Alarm).await;
        }));
    }

    async fn handle_request(&mut self, request: ShardRequest) -> ShardResponse {
        self.last_activity_ms = Utc::now().timestamp_millis();
        let started = Instant::now();

        let normalised = self.resolver.normalise(&request.path).to_string();
        if let Some(op) = normalised.strip_prefix("/_runtime/") {
            let op = op.to_string();
            return self.handle_control(&op, &request).await;
        }

        if self.id.kind == ShardKind::Session {
            self.storage
                .set(
                    keys::session("meta"),
                    json!({
                        "session_id": self.id.key,
                        "last_seen": self.last_activity_ms,
                    }),
                )
                .await;
        }

        if self.id.kind == ShardKind::User {
            match rate_limit::admit(&self.storage, &self.id.key, &self.config.rate_limit).await {
                Ok(Admission::Allowed) => {}
                Ok(Admission::Denied {
                    retry_after_seconds,
                }) => return response::rate_limited(retry_after_seconds),
                Err(err) => {
                    return response::internal_error(
                        &err.to_string(),
                        started.elapsed().as_millis() as i64,
                    )
                }
            }
        }

        match self.trigger_flow(&request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(shard = %self.id, error = %err, "request failed at the engine boundary");
                // Pending writes must not be lost behind a 500.
                if let Err(flush_err) = self.storage.flush().await {
                    tracing::warn!(shard = %self.id, error = %flush_err, "flush before error return failed");
                }
                response::internal_error(&err, started.elapsed().as_millis() as i64)
            }
        }
    }

    async fn trigger_flow(&mut self, request: &ShardRequest) -> Result<ShardResponse, String> {
        let started = Instant::now();
        let route = self
            .resolver
            .resolve(&self.catalog, &request.method, &request.path)
            .await
            .map_err(|e| e.to_string())?;
        let Some(route) = route else {
            let path = self.resolver.normalise(&request.path).to_string();
            return Ok(response::not_found(&request.method, &path));
        };

        let engine = self.engine_for_route(&route).await?;
        let msg = self.request_message(request);
        let msg_id = msg.id.clone();

        let descriptor = engine
            .trigger(&route.entry_node_id, msg, request.cancel.clone())
            .await
            .map_err(|e| e.to_string())?;
        let duration_ms = started.elapsed().as_millis() as i64;

        let now = Utc::now().timestamp_millis();
        self.storage
            .set(
                keys::log_record(now),
                json!({
                    "flow_id": route.flow_id,
                    "duration_ms": duration_ms,
                    "status": descriptor.as_ref().map(|d| d.status).unwrap_or(200),
                }),
            )
            .await;

        let _ = self.events.send(json!({
            "type": "flow_result",
            "flow_id": route.flow_id,
            "result": descriptor.as_ref().map(|d| d.payload.clone()).unwrap_or(Value::Null),
            "duration_ms": duration_ms,
        }));

        Ok(match descriptor {
            Some(descriptor) => response::from_descriptor(
                descriptor,
                &route.flow_id,
                &msg_id,
                duration_ms,
                self.config.large_body_bytes,
            ),
            None => response::default_success(&route.flow_id, &msg_id, duration_ms),
        })
    }

    /// Message delivered to the entry node for an HTTP trigger.
    fn request_message(&self, request: &ShardRequest) -> Message {
        let mut msg = Message::new(request.body.clone().unwrap_or(Value::Null));
        msg.extra
            .insert("method".into(), json!(request.method));
        msg.extra.insert(
            "path".into(),
            json!(self.resolver.normalise(&request.path)),
        );
        msg.extra.insert("query".into(), json!(request.query));
        let headers: serde_json::Map<String, Value> = request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        msg.extra.insert("req_headers".into(), Value::Object(headers));
        msg
    }

    pub(crate) async fn engine_for_route(
        &mut self,
        route: &ResolvedRoute,
    ) -> Result<Arc<FlowEngine>, String> {
        self.engine_for_flow(&route.flow_id, Some(route.flow.clone()))
            .await
    }

    /// Cached engine lookup; on miss, construct and initialise.
    pub(crate) async fn engine_for_flow(
        &mut self,
        flow_id: &str,
        flow: Option<FlowConfig>,
    ) -> Result<Arc<FlowEngine>, String> {
        if let Some(engine) = self.engines.get(flow_id) {
            return Ok(engine.clone());
        }
        let flow = match flow {
            Some(flow) => flow,
            None => self
                .catalog
                .fetch_flow(flow_id)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("flow {flow_id} not in catalog"))?,
        };
        let context = Arc::new(ExecutionContext::new(
            flow_id.to_string(),
            self.storage.clone(),
            self.env.clone(),
        ));
        let engine = Arc::new(FlowEngine::new(flow, context));
        engine
            .initialize(&self.registry)
            .await
            .map_err(|e| e.to_string())?;
        tracing::info!(shard = %self.id, flow_id = %flow_id, "engine initialised");
        self.engines.insert(flow_id.to_string(), engine.clone());
        Ok(engine)
    }

    async fn invalidate_flow(&mut self, flow_id: &str) {
        if let Some(engine) = self.engines.remove(flow_id) {
            engine.close().await;
            tracing::info!(shard = %self.id, flow_id = %flow_id, "engine dropped on catalog invalidation");
        }
        self.resolver.invalidate_flow(flow_id);
    }

    /// Close and drop every cached engine, clear the route cache.
    pub(crate) async fn evict_engines(&mut self) {
        for (_, engine) in self.engines.drain() {
            engine.close().await;
        }
        self.resolver.clear();
    }

    // ── jobs ─────────────────────────────────────────────────────────────

    async fn handle_job(&mut self, request: ShardRequest) {
        self.last_activity_ms = Utc::now().timestamp_millis();
        self.storage
            .set(
                keys::session("job"),
                json!({"status": "running", "submitted_at": self.last_activity_ms}),
            )
            .await;

        let outcome = self.trigger_flow(&request).await;
        let record = match outcome {
            Ok(response) => {
                let result = match &response.body {
                    ResponseBody::Json(value) => value.clone(),
                    ResponseBody::Text(text) => json!(text),
                    ResponseBody::Stream(_) => json!("<streamed>"),
                };
                json!({
                    "status": if response.status < 400 { "done" } else { "error" },
                    "status_code": response.status,
                    "result": result,
                    "completed_at": Utc::now().timestamp_millis(),
                })
            }
            Err(err) => json!({
                "status": "error",
                "error": err,
                "completed_at": Utc::now().timestamp_millis(),
            }),
        };
        self.storage.set(keys::session("job"), record).await;
    }

    // ── internal control plane ───────────────────────────────────────────

    async fn handle_control(&mut self, op: &str, request: &ShardRequest) -> ShardResponse {
        match op {
            "status" => {
                let mut flows: Vec<&String> = self.engines.keys().collect();
                flows.sort();
                ShardResponse::json(
                    200,
                    json!({
                        "shard": self.id.to_string(),
                        "engines": flows,
                        "routes_cached": self.resolver.len(),
                        "pending_writes": self.storage.pending_count().await,
                        "last_activity_ms": self.last_activity_ms,
                    }),
                )
            }
            "session/info" => match self.storage.get_many(keys::SESSION).await {
                Ok(entries) => {
                    let session: serde_json::Map<String, Value> = entries
                        .into_iter()
                        .map(|(k, v)| (k[keys::SESSION.len()..].to_string(), v))
                        .collect();
                    ShardResponse::json(200, Value::Object(session))
                }
                Err(err) => response::internal_error(&err.to_string(), 0),
            },
            "session/clear" => {
                self.evict_engines().await;
                if let Err(err) = self.storage.backend().delete_all().await {
                    return response::internal_error(&err.to_string(), 0);
                }
                ShardResponse::json(200, json!({"success": true}))
            }
            "debug/messages" => match self.storage.get_many(keys::DEBUG).await {
                Ok(entries) => {
                    let mut records: Vec<Value> = entries.into_iter().map(|(_, v)| v).collect();
                    records.sort_by_key(|r| r["timestamp"].as_i64().unwrap_or(0));
                    ShardResponse::json(200, json!({"messages": records}))
                }
                Err(err) => response::internal_error(&err.to_string(), 0),
            },
            "cache/clear" => {
                let dropped = self.engines.len();
                self.evict_engines().await;
                ShardResponse::json(200, json!({"success": true, "engines_dropped": dropped}))
            }
            "execute" => self.handle_manual_execute(request).await,
            "job/status" => match self.storage.get(&keys::session("job")).await {
                Ok(Some(job)) => ShardResponse::json(
                    200,
                    json!({"job_id": self.id.key, "status": job["status"]}),
                ),
                Ok(None) => {
                    ShardResponse::json(404, json!({"error": "unknown job", "job_id": self.id.key}))
                }
                Err(err) => response::internal_error(&err.to_string(), 0),
            },
            "job/result" => match self.storage.get(&keys::session("job")).await {
                Ok(Some(job)) if job["status"] == json!("running") => {
                    ShardResponse::json(202, json!({"status": "running"}))
                }
                Ok(Some(job)) => ShardResponse::json(200, job),
                Ok(None) => {
                    ShardResponse::json(404, json!({"error": "unknown job", "job_id": self.id.key}))
                }
                Err(err) => response::internal_error(&err.to_string(), 0),
            },
            other => ShardResponse::json(404, json!({"error": format!("unknown control op {other}")})),
        }
    }

    /// Manual execution with an explicit entry node.
    async fn handle_manual_execute(&mut self, request: &ShardRequest) -> ShardResponse {
        let Some(body) = &request.body else {
            return ShardResponse::json(400, json!({"error": "execute needs a JSON body"}));
        };
        let (Some(flow_id), Some(node_id)) = (
            body.get("flow_id").and_then(Value::as_str),
            body.get("node_id").and_then(Value::as_str),
        ) else {
            return ShardResponse::json(400, json!({"error": "execute needs flow_id and node_id"}));
        };

        let engine = match self.engine_for_flow(flow_id, None).await {
            Ok(engine) => engine,
            Err(err) => return ShardResponse::json(404, json!({"error": err})),
        };
        let msg = Message::new(body.get("payload").cloned().unwrap_or(Value::Null));
        let msg_id = msg.id.clone();
        match engine.execute_node(node_id, msg).await {
            Ok(_) => ShardResponse::json(
                200,
                json!({"success": true, "flow_id": flow_id, "node_id": node_id, "msg_id": msg_id}),
            ),
            Err(err) => ShardResponse::json(404, json!({"error": err.to_string()})),
        }
    }
}
