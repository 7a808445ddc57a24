//! Dot-path access into JSON values.
//!
//! Paths are dot-separated segments; a numeric segment indexes into an
//! array (`items.0.name`). Used by the message model and the property
//! rules of the transform nodes.

use serde_json::Value;

/// Resolve a dot-path inside `value`.
pub fn get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write a dot-path inside `value`, creating intermediate objects for
/// missing segments. A non-container in the way is replaced by an object.
pub fn set(value: &mut Value, path: &str, new_value: Value) {
    let mut current = value;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        let array_index = match current {
            Value::Array(items) => segment.parse::<usize>().ok().filter(|idx| *idx < items.len()),
            _ => None,
        };
        if let Some(index) = array_index {
            if let Value::Array(items) = current {
                if last {
                    items[index] = new_value;
                    return;
                }
                current = &mut items[index];
                continue;
            }
        }
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        let map = current.as_object_mut().unwrap();
        if last {
            map.insert(segment.to_string(), new_value);
            return;
        }
        current = map.entry(segment.to_string()).or_insert(Value::Null);
    }
}

/// Remove the value at a dot-path, if present.
pub fn delete(value: &mut Value, path: &str) {
    let (parent_path, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };
    let parent = match parent_path {
        Some(p) => match get_mut(value, p) {
            Some(parent) => parent,
            None => return,
        },
        None => value,
    };
    match parent {
        Value::Object(map) => {
            map.remove(leaf);
        }
        Value::Array(items) => {
            if let Ok(index) = leaf.parse::<usize>() {
                if index < items.len() {
                    items.remove(index);
                }
            }
        }
        _ => {}
    }
}

fn get_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => {
                let index = segment.parse::<usize>().ok()?;
                items.get_mut(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}
