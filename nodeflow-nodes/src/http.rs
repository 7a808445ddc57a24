//! HTTP nodes: `http-in`, `http-response`, `http-request`.

use std::sync::OnceLock;
use std::time::Duration;

use base64::Engine as _;
use nodeflow_core::registry::BoxFuture;
use nodeflow_core::{
    ExecutionContext, HttpResponseOut, Invocation, Message, NodeBody, NodeDefinition, NodeError,
    NodeInstance, NodeOutput, NodeRegistry, NodeUi,
};
use serde_json::{json, Value};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub fn register(registry: &NodeRegistry) {
    registry.register(
        NodeDefinition::new("http-in", "input", 0, 1, HttpIn)
            .with_defaults(json!({"method": "GET", "path": "/"}))
            .with_ui(NodeUi {
                icon: Some("white-globe".into()),
                color: Some("#e7e7ae".into()),
                palette_label: Some("http in".into()),
                properties: json!({"method": "string", "path": "string"}),
            }),
    );
    registry.register(
        NodeDefinition::new("http-response", "output", 1, 0, HttpResponse)
            .with_defaults(json!({"status": 200, "headers": {}}))
            .with_ui(NodeUi {
                icon: Some("white-globe".into()),
                color: Some("#e7e7ae".into()),
                palette_label: Some("http response".into()),
                properties: json!({"status": "number", "headers": "object"}),
            }),
    );
    registry.register(
        NodeDefinition::new("http-request", "function", 1, 1, HttpRequest)
            .with_defaults(json!({"method": "GET", "ret": "txt", "timeout_ms": 15000}))
            .with_ui(NodeUi {
                icon: Some("white-globe".into()),
                color: Some("#e7e7ae".into()),
                palette_label: Some("http request".into()),
                properties: json!({"url": "string", "method": "string", "ret": "string"}),
            }),
    );
}

/// Graph entry for HTTP-triggered flows. Pure pass-through; its
/// `method`/`path` options declare the route the resolver binds.
struct HttpIn;

impl NodeBody for HttpIn {
    fn execute<'a>(
        &'a self,
        _node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        _inv: &'a Invocation,
        msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move { Ok(NodeOutput::One(msg)) })
    }
}

/// Writes the terminal HTTP response descriptor and consumes the message.
/// Descriptor headers are the union of configured headers and any
/// `headers` field on the message (message wins on collision).
struct HttpResponse;

impl NodeBody for HttpResponse {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        inv: &'a Invocation,
        msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let status = node.config_u64("status").unwrap_or(200) as u16;

            let mut headers: Vec<(String, String)> = Vec::new();
            if let Some(Value::Object(configured)) = node.config_value("headers") {
                for (k, v) in configured {
                    headers.push((k.clone(), header_value(v)));
                }
            }
            if let Some(Value::Object(from_msg)) = msg.extra.get("headers") {
                for (k, v) in from_msg {
                    headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(k));
                    headers.push((k.clone(), header_value(v)));
                }
            }

            inv.set_response(HttpResponseOut {
                status,
                headers,
                payload: msg.payload,
            });
            Ok(NodeOutput::None)
        })
    }
}

fn header_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Outbound HTTP call. Non-2xx responses do not fail the node; the status
/// code is annotated on the message instead.
struct HttpRequest;

fn shared_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default()
    })
}

impl NodeBody for HttpRequest {
    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        _ctx: &'a ExecutionContext,
        inv: &'a Invocation,
        mut msg: Message,
    ) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let url = msg
                .get("url")
                .and_then(|v| v.as_str().map(str::to_string))
                .or_else(|| node.config_str("url").map(str::to_string))
                .ok_or_else(|| NodeError::new("http-request: no url configured"))?;
            let method = node.config_str("method").unwrap_or("GET").to_uppercase();
            let ret = node.config_str("ret").unwrap_or("txt").to_string();
            let timeout = node
                .config_u64("timeout_ms")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

            let method = reqwest::Method::from_bytes(method.as_bytes())
                .map_err(|_| NodeError::new(format!("http-request: bad method {method}")))?;
            let mut request = shared_client().request(method.clone(), &url).timeout(timeout);
            if method != reqwest::Method::GET && !msg.payload.is_null() {
                request = match &msg.payload {
                    Value::String(text) => request.body(text.clone()),
                    other => request.json(other),
                };
            }

            // Best-effort cancellation: drop the in-flight call when the
            // trigger is cancelled.
            let response = tokio::select! {
                resp = request.send() => resp,
                _ = inv.cancel_token().cancelled() => {
                    return Err(NodeError::new("http-request: cancelled"));
                }
            }
            .map_err(|err| NodeError::new(format!("http-request: {err}")))?;

            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|err| NodeError::new(format!("http-request: {err}")))?;

            msg.payload = match ret.as_str() {
                "bin" => Value::String(base64::engine::general_purpose::STANDARD.encode(&body)),
                "obj" => serde_json::from_slice(&body)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned())),
                _ => Value::String(String::from_utf8_lossy(&body).into_owned()),
            };
            msg.extra.insert("status_code".into(), json!(status));
            Ok(NodeOutput::One(msg))
        })
    }
}
