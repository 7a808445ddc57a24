//! Shard response formatting.
//!
//! Maps engine results and runtime failures onto stable wire shapes:
//! diagnostic headers, JSON error envelopes, the default success envelope
//! when no node produced a descriptor, and streaming for large bodies.

use bytes::Bytes;
use nodeflow_core::HttpResponseOut;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;

pub const HEADER_EXECUTION_TIME: &str = "X-Execution-Time";
pub const HEADER_FLOW_ID: &str = "X-Flow-ID";
pub const HEADER_MESSAGE_ID: &str = "X-Message-ID";
pub const HEADER_SESSION_ID: &str = "X-Session-ID";

const STREAM_CHUNK: usize = 64 * 1024;

/// Response body, streamed when the encoded payload crosses the large
/// threshold.
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Stream(ReceiverStream<Result<Bytes, std::convert::Infallible>>),
}

pub struct ShardResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl ShardResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Json(body),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Body bytes for tests and non-streaming consumers. `None` for
    /// streamed bodies.
    pub fn body_bytes(&self) -> Option<Vec<u8>> {
        match &self.body {
            ResponseBody::Json(value) => Some(serde_json::to_vec(value).unwrap_or_default()),
            ResponseBody::Text(text) => Some(text.clone().into_bytes()),
            ResponseBody::Stream(_) => None,
        }
    }
}

/// Build the response for a flow trigger that produced a descriptor.
pub fn from_descriptor(
    descriptor: HttpResponseOut,
    flow_id: &str,
    msg_id: &str,
    duration_ms: i64,
    large_body_bytes: usize,
) -> ShardResponse {
    let mut headers = descriptor.headers;
    headers.push((HEADER_EXECUTION_TIME.into(), format!("{duration_ms}ms")));
    headers.push((HEADER_FLOW_ID.into(), flow_id.to_string()));
    headers.push((HEADER_MESSAGE_ID.into(), msg_id.to_string()));

    let body = match descriptor.payload {
        Value::String(text) if text.len() > large_body_bytes => stream_text(text),
        Value::String(text) => ResponseBody::Text(text),
        other => {
            let encoded = serde_json::to_string(&other).unwrap_or_default();
            if encoded.len() > large_body_bytes {
                stream_text(encoded)
            } else {
                ResponseBody::Json(other)
            }
        }
    };

    ShardResponse {
        status: descriptor.status,
        headers,
        body,
    }
}

/// Default envelope when the flow completed without a descriptor.
pub fn default_success(flow_id: &str, msg_id: &str, duration_ms: i64) -> ShardResponse {
    ShardResponse::json(
        200,
        json!({"success": true, "duration_ms": duration_ms, "flow_id": flow_id}),
    )
    .with_header(HEADER_EXECUTION_TIME, format!("{duration_ms}ms"))
    .with_header(HEADER_FLOW_ID, flow_id)
    .with_header(HEADER_MESSAGE_ID, msg_id)
}

pub fn not_found(method: &str, path: &str) -> ShardResponse {
    ShardResponse::json(
        404,
        json!({"error": "no flow matches this route", "path": path, "method": method}),
    )
}

pub fn rate_limited(retry_after_seconds: i64) -> ShardResponse {
    ShardResponse::json(
        429,
        json!({"error": "rate limit exceeded", "retry_after_seconds": retry_after_seconds}),
    )
}

pub fn internal_error(message: &str, duration_ms: i64) -> ShardResponse {
    ShardResponse::json(500, json!({"error": message, "duration_ms": duration_ms}))
}

fn stream_text(text: String) -> ResponseBody {
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    tokio::spawn(async move {
        let bytes = Bytes::from(text);
        let mut offset = 0;
        while offset < bytes.len() {
            let end = (offset + STREAM_CHUNK).min(bytes.len());
            if tx.send(Ok(bytes.slice(offset..end))).await.is_err() {
                break;
            }
            offset = end;
        }
    });
    ResponseBody::Stream(ReceiverStream::new(rx))
}
