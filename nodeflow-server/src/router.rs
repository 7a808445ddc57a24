//! Front-door router.
//!
//! Prefix classification per sharding dimension:
//!
//! | Prefix | Shard |
//! |---|---|
//! | `/api/chat/*` | session |
//! | `/api/user/*` | user (401 without an identity) |
//! | `/api/jobs/…` | job (submit + poll) |
//! | `/api/workspace/<id>/*` | workspace |
//! | `/api/tools/*` | global |
//! | anything else under `/api/` | session (default) |
//!
//! The router injects the sharding-type header on the forwarded request
//! and echoes the session id header back on session-sharded responses.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use http::header::CONTENT_TYPE;
use nodeflow_core::NodeRegistry;
use nodeflow_executor::response::HEADER_SESSION_ID;
use nodeflow_executor::{
    ResponseBody, ShardHandle, ShardId, ShardKind, ShardManager, ShardRequest, ShardResponse,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

const BODY_LIMIT: usize = 16 * 1024 * 1024;
const HEADER_SHARD_TYPE: &str = "X-Shard-Type";
const HEADER_USER_ID: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ShardManager>,
    pub registry: Arc<NodeRegistry>,
    pub api_prefix: String,
    pub version: &'static str,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/nodes", get(nodes))
        .route("/admin/{*rest}", any(admin_stub))
        .route("/api/{*rest}", any(front_door))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"status": "ok", "version": state.version}))
}

/// Node-descriptor discovery endpoint consumed by the graph editor.
async fn nodes(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"nodes": state.registry.descriptors()}))
}

/// The administrative surface lives in a separate deployment.
async fn admin_stub() -> Response {
    (
        http::StatusCode::NOT_FOUND,
        Json(json!({"error": "the admin surface is not hosted by the runtime"})),
    )
        .into_response()
}

/// Where a classified request goes.
enum Target {
    Shard {
        id: ShardId,
        /// Session id echoed back on the response.
        session_echo: Option<String>,
    },
    JobSubmit,
    JobPoll {
        job_id: String,
        op: &'static str,
    },
}

async fn front_door(State(state): State<AppState>, req: Request) -> Response {
    let (mut parts, body) = req.into_parts();
    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();
    let query = parse_query(parts.uri.query());

    let target = match classify(&path, &method, &parts.headers, &query, &state.api_prefix) {
        Ok(target) => target,
        Err(response) => return response,
    };

    match target {
        Target::JobSubmit => {
            let body = match read_body(body).await {
                Ok(body) => body,
                Err(response) => return response,
            };
            submit_job(&state, body).await
        }
        Target::JobPoll { job_id, op } => {
            let shard = state.manager.shard(ShardId::new(ShardKind::Job, job_id));
            let request = ShardRequest::new(
                "GET",
                format!("{}/_runtime/job/{op}", state.api_prefix),
            );
            to_http(shard.handle(request).await, None)
        }
        Target::Shard { id, session_echo } => {
            let shard = state.manager.shard(id.clone());

            // WebSocket upgrades are accepted on any shard URL.
            if is_websocket(&parts.headers) {
                match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
                    Ok(upgrade) => {
                        let prefix = state.api_prefix.clone();
                        let peer = session_echo.clone().unwrap_or_else(|| id.key.clone());
                        return upgrade.on_upgrade(move |socket| {
                            crate::ws::serve(socket, shard, peer, prefix)
                        });
                    }
                    Err(rejection) => return rejection.into_response(),
                }
            }

            let body = match read_body(body).await {
                Ok(body) => body,
                Err(response) => return response,
            };

            let mut headers: Vec<(String, String)> = parts
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            headers.push((HEADER_SHARD_TYPE.into(), id.kind.as_str().into()));

            // Cancellation: dropping this handler (client disconnect)
            // cancels the trigger.
            let cancel = tokio_util::sync::CancellationToken::new();
            let _guard = cancel.clone().drop_guard();

            let mut request = ShardRequest::new(method, path).with_query(query);
            request.headers = headers;
            request.body = body;
            request.cancel = cancel;

            to_http(shard.handle(request).await, session_echo)
        }
    }
}

fn classify(
    path: &str,
    method: &str,
    headers: &http::HeaderMap,
    query: &HashMap<String, String>,
    api_prefix: &str,
) -> Result<Target, Response> {
    let rest = path.strip_prefix(api_prefix).unwrap_or(path);

    if rest == "/jobs/submit" {
        if method != "POST" {
            return Err(error_response(405, json!({"error": "job submission is POST only"})));
        }
        return Ok(Target::JobSubmit);
    }
    if let Some(job_path) = rest.strip_prefix("/jobs/") {
        let mut segments = job_path.splitn(2, '/');
        let job_id = segments.next().unwrap_or_default().to_string();
        let op = match segments.next() {
            Some("status") => "status",
            Some("result") => "result",
            _ => {
                return Err(error_response(
                    404,
                    json!({"error": "unknown job operation", "path": rest}),
                ))
            }
        };
        return Ok(Target::JobPoll { job_id, op });
    }

    if rest.starts_with("/user") {
        let user_id = headers
            .get(HEADER_USER_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| bearer_token(headers));
        return match user_id {
            Some(user_id) => Ok(Target::Shard {
                id: ShardId::new(ShardKind::User, user_id),
                session_echo: None,
            }),
            None => Err(error_response(
                401,
                json!({
                    "error": "user routes need an identity",
                    "hint": "send an X-User-ID header or a bearer token"
                }),
            )),
        };
    }

    if let Some(ws_path) = rest.strip_prefix("/workspace/") {
        let workspace_id = ws_path.split('/').next().unwrap_or("default").to_string();
        return Ok(Target::Shard {
            id: ShardId::new(ShardKind::Workspace, workspace_id),
            session_echo: None,
        });
    }

    if rest.starts_with("/tools") {
        return Ok(Target::Shard {
            id: ShardId::global(),
            session_echo: None,
        });
    }

    // `/chat/*` and everything else default to session sharding.
    let session_id = query
        .get("session_id")
        .cloned()
        .or_else(|| {
            headers
                .get("x-session-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    Ok(Target::Shard {
        id: ShardId::new(ShardKind::Session, session_id.clone()),
        session_echo: Some(session_id),
    })
}

fn bearer_token(headers: &http::HeaderMap) -> Option<String> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn is_websocket(headers: &http::HeaderMap) -> bool {
    headers
        .get(http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(query) = query else {
        return map;
    };
    for pair in query.split('&') {
        let mut kv = pair.splitn(2, '=');
        if let Some(key) = kv.next() {
            if !key.is_empty() {
                map.insert(key.to_string(), kv.next().unwrap_or("").to_string());
            }
        }
    }
    map
}

/// Read and loosely parse the request body: JSON when it parses, text
/// otherwise, `None` when empty.
async fn read_body(body: Body) -> Result<Option<Value>, Response> {
    let bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return Err(error_response(
                413,
                json!({"error": format!("body read failed: {err}")}),
            ))
        }
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(_) => Ok(Some(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))),
    }
}

/// Fire-and-forget job submission: `202` plus polling URLs.
async fn submit_job(state: &AppState, body: Option<Value>) -> Response {
    let Some(body) = body else {
        return error_response(400, json!({"error": "job submission needs a JSON body"}));
    };
    let Some(flow_path) = body.get("path").and_then(Value::as_str) else {
        return error_response(400, json!({"error": "job submission needs a 'path'"}));
    };
    let method = body
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("POST")
        .to_string();
    let payload = body.get("payload").cloned();

    let job_id = Uuid::new_v4().to_string();
    let shard: ShardHandle = state
        .manager
        .shard(ShardId::new(ShardKind::Job, job_id.clone()));

    let mut request = ShardRequest::new(method, format!("{}{flow_path}", state.api_prefix));
    request.body = payload;
    shard.fire(request).await;

    let response = Json(json!({
        "jobId": job_id,
        "statusUrl": format!("{}/jobs/{job_id}/status", state.api_prefix),
        "resultUrl": format!("{}/jobs/{job_id}/result", state.api_prefix),
    }));
    (http::StatusCode::ACCEPTED, response).into_response()
}

fn error_response(status: u16, body: Value) -> Response {
    (
        http::StatusCode::from_u16(status).unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR),
        Json(body),
    )
        .into_response()
}

/// Map a shard response onto the HTTP surface.
fn to_http(response: ShardResponse, session_echo: Option<String>) -> Response {
    let mut builder = http::Response::builder().status(
        http::StatusCode::from_u16(response.status)
            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR),
    );
    for (name, value) in &response.headers {
        builder = builder.header(name, value);
    }
    if let Some(session_id) = session_echo {
        builder = builder.header(HEADER_SESSION_ID, session_id);
    }

    let result = match response.body {
        ResponseBody::Json(value) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&value).unwrap_or_default())),
        ResponseBody::Text(text) => builder.body(Body::from(text)),
        ResponseBody::Stream(stream) => builder.body(Body::from_stream(stream)),
    };
    result.unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to build response, flow headers were invalid");
        error_response(500, json!({"error": "invalid response headers"}))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> http::HeaderMap {
        let mut map = http::HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        map
    }

    fn classify_ok(path: &str, method: &str, hdrs: &[(&str, &str)]) -> Target {
        classify(path, method, &headers(hdrs), &HashMap::new(), "/api")
            .unwrap_or_else(|_| panic!("expected classification for {path}"))
    }

    #[test]
    fn chat_and_default_paths_use_session_sharding() {
        for path in ["/api/chat/room", "/api/anything"] {
            match classify_ok(path, "GET", &[]) {
                Target::Shard { id, session_echo } => {
                    assert_eq!(id.kind, ShardKind::Session);
                    assert!(session_echo.is_some());
                }
                _ => panic!("expected a session shard for {path}"),
            }
        }
    }

    #[test]
    fn session_id_from_header_is_reused() {
        match classify_ok("/api/chat/x", "GET", &[("x-session-id", "abc")]) {
            Target::Shard { id, session_echo } => {
                assert_eq!(id.key, "abc");
                assert_eq!(session_echo.as_deref(), Some("abc"));
            }
            _ => panic!("expected a session shard"),
        }
    }

    #[test]
    fn user_paths_need_an_identity() {
        assert!(classify("/api/user/profile", "GET", &headers(&[]), &HashMap::new(), "/api").is_err());

        match classify_ok("/api/user/profile", "GET", &[("x-user-id", "u1")]) {
            Target::Shard { id, .. } => {
                assert_eq!(id.kind, ShardKind::User);
                assert_eq!(id.key, "u1");
            }
            _ => panic!("expected a user shard"),
        }

        match classify_ok("/api/user/profile", "GET", &[("authorization", "Bearer tok")]) {
            Target::Shard { id, .. } => assert_eq!(id.key, "tok"),
            _ => panic!("expected a user shard"),
        }
    }

    #[test]
    fn workspace_and_tools_shards() {
        match classify_ok("/api/workspace/w7/docs", "GET", &[]) {
            Target::Shard { id, .. } => {
                assert_eq!(id.kind, ShardKind::Workspace);
                assert_eq!(id.key, "w7");
            }
            _ => panic!("expected a workspace shard"),
        }
        match classify_ok("/api/tools/calc", "GET", &[]) {
            Target::Shard { id, .. } => assert_eq!(id.kind, ShardKind::Global),
            _ => panic!("expected the global shard"),
        }
    }

    #[test]
    fn job_routes() {
        assert!(matches!(
            classify_ok("/api/jobs/submit", "POST", &[]),
            Target::JobSubmit
        ));
        match classify_ok("/api/jobs/j1/status", "GET", &[]) {
            Target::JobPoll { job_id, op } => {
                assert_eq!(job_id, "j1");
                assert_eq!(op, "status");
            }
            _ => panic!("expected a job poll"),
        }
        assert!(classify("/api/jobs/submit", "GET", &headers(&[]), &HashMap::new(), "/api").is_err());
    }

    #[test]
    fn query_parsing() {
        let query = parse_query(Some("a=1&b=two&empty"));
        assert_eq!(query.get("a").unwrap(), "1");
        assert_eq!(query.get("b").unwrap(), "two");
        assert_eq!(query.get("empty").unwrap(), "");
    }
}
