//! WebSocket surface.
//!
//! One socket per connection, associated with its shard. Protocol:
//! `connected` on attach, `ping`/`pong`, `get_session`/`session_data`,
//! and broadcast `flow_result` frames whenever a flow completes on the
//! shard. Close and error frames are logged and end the loop.

use axum::extract::ws::{Message, WebSocket};
use nodeflow_executor::{ShardHandle, ShardRequest};
use serde_json::{json, Value};

pub async fn serve(mut socket: WebSocket, shard: ShardHandle, peer_id: String, api_prefix: String) {
    let Some(mut events) = shard.subscribe().await else {
        tracing::warn!(shard = %shard.id(), "shard gone before websocket attach");
        return;
    };

    let hello = json!({
        "type": "connected",
        "session_id": peer_id,
        "timestamp": chrono_now_ms(),
    });
    if send_json(&mut socket, &hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = socket.recv() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(err) = handle_frame(&mut socket, &shard, &api_prefix, text.as_str()).await {
                        tracing::warn!(shard = %shard.id(), error = %err, "websocket frame failed");
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(shard = %shard.id(), "websocket closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(shard = %shard.id(), error = %err, "websocket receive error");
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if send_json(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(shard = %shard.id(), skipped, "websocket subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn handle_frame(
    socket: &mut WebSocket,
    shard: &ShardHandle,
    api_prefix: &str,
    text: &str,
) -> Result<(), String> {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => return Ok(()), // non-JSON frames are ignored
    };
    match frame.get("type").and_then(Value::as_str) {
        Some("ping") => send_json(socket, &json!({"type": "pong"})).await,
        Some("get_session") => {
            let request_id = frame.get("request_id").cloned().unwrap_or(Value::Null);
            let info = shard
                .handle(ShardRequest::new(
                    "GET",
                    format!("{api_prefix}/_runtime/session/info"),
                ))
                .await;
            let session: Value = info
                .body_bytes()
                .and_then(|bytes| serde_json::from_slice(&bytes).ok())
                .unwrap_or(Value::Null);
            send_json(
                socket,
                &json!({"type": "session_data", "request_id": request_id, "session": session}),
            )
            .await
        }
        _ => Ok(()),
    }
}

async fn send_json(socket: &mut WebSocket, value: &Value) -> Result<(), String> {
    let text = serde_json::to_string(value).map_err(|e| e.to_string())?;
    socket
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| e.to_string())
}

fn chrono_now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
