//! Message envelope flowing through a trigger.
//!
//! A message owns a handful of well-known slots (`id`, `topic`, `payload`,
//! `parts`, `error`, `http_response`) plus a side bag of arbitrary
//! user-set fields. Everything is plain JSON, so the canonical deep copy is
//! `Clone`: `serde_json::Value` clones structurally and nothing aliases.
//! The copy keeps the original `id` — identity only changes when a node
//! explicitly re-identifies a message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::paths;

/// Stream descriptor attached by `split` and consumed by `join`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parts {
    /// Shared id for all messages of one split.
    pub stream_id: String,
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(rename = "type")]
    pub kind: PartsKind,
    /// Member key when the split source was an object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartsKind {
    Array,
    Object,
    String,
}

/// Reference to the node an error or status event originated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Structured error carried by a message (fed to `catch` nodes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<NodeRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Terminal HTTP response descriptor written by `http-response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponseOut {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub payload: Value,
}

/// The record flowing through a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Parts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_response: Option<HttpResponseOut>,
    /// Arbitrary user-set fields, flattened into the JSON form.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// New message with a fresh id and the given payload.
    pub fn new(payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: None,
            payload,
            parts: None,
            error: None,
            http_response: None,
            extra: Map::new(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// A message carrying an HTTP response descriptor is terminal.
    pub fn is_terminal(&self) -> bool {
        self.http_response.is_some()
    }

    /// Read a dot-path rooted at the message (`payload.x.0.y`, `topic`,
    /// user fields by name).
    pub fn get(&self, path: &str) -> Option<Value> {
        let (root, rest) = split_root(path);
        match root {
            "id" => rest.is_none().then(|| Value::String(self.id.clone())),
            "topic" => rest
                .is_none()
                .then(|| self.topic.clone().map(Value::String).unwrap_or(Value::Null)),
            "payload" => match rest {
                None => Some(self.payload.clone()),
                Some(rest) => paths::get(&self.payload, rest).cloned(),
            },
            other => {
                let value = self.extra.get(other)?;
                match rest {
                    None => Some(value.clone()),
                    Some(rest) => paths::get(value, rest).cloned(),
                }
            }
        }
    }

    /// Write a dot-path rooted at the message, creating intermediate
    /// objects as needed.
    pub fn set(&mut self, path: &str, value: Value) {
        let (root, rest) = split_root(path);
        match root {
            "id" => {
                if let Value::String(s) = value {
                    self.id = s;
                }
            }
            "topic" => {
                self.topic = match value {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                };
            }
            "payload" => match rest {
                None => self.payload = value,
                Some(rest) => paths::set(&mut self.payload, rest, value),
            },
            other => match rest {
                None => {
                    self.extra.insert(other.to_string(), value);
                }
                Some(rest) => {
                    let slot = self
                        .extra
                        .entry(other.to_string())
                        .or_insert(Value::Null);
                    paths::set(slot, rest, value);
                }
            },
        }
    }

    /// Remove a dot-path. Removing `payload` resets it to null.
    pub fn delete(&mut self, path: &str) {
        let (root, rest) = split_root(path);
        match root {
            "topic" if rest.is_none() => self.topic = None,
            "payload" => match rest {
                None => self.payload = Value::Null,
                Some(rest) => paths::delete(&mut self.payload, rest),
            },
            other => match rest {
                None => {
                    self.extra.remove(other);
                }
                Some(rest) => {
                    if let Some(slot) = self.extra.get_mut(other) {
                        paths::delete(slot, rest);
                    }
                }
            },
        }
    }

    /// Move a value from one path to another (`change` node `move` rule).
    pub fn move_field(&mut self, from: &str, to: &str) {
        if let Some(value) = self.get(from) {
            self.delete(from);
            self.set(to, value);
        }
    }
}

fn split_root(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((root, rest)) => (root, Some(rest)),
        None => (path, None),
    }
}
