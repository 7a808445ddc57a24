//! Flow JSON loading.
//!
//! The server binary seeds the in-memory catalog from a directory of
//! `*.json` flow files at boot. The admin layer owns live CRUD; this is
//! the embedded bootstrap path.

use std::path::Path;

use nodeflow_core::{FlowConfig, InMemoryCatalog};

/// Load every `*.json` file under `dir` into the catalog. Malformed files
/// are logged and skipped. Returns the number of flows loaded.
pub fn load_dir(catalog: &InMemoryCatalog, dir: &Path) -> std::io::Result<usize> {
    let mut loaded = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let text = std::fs::read_to_string(&path)?;
        match FlowConfig::from_json(&text) {
            Ok(flow) => {
                tracing::info!(flow_id = %flow.id, file = %path.display(), "flow loaded");
                catalog.insert_flow(flow);
                loaded += 1;
            }
            Err(err) => {
                tracing::warn!(file = %path.display(), error = %err, "skipping malformed flow file");
            }
        }
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_json_files_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("echo.json"),
            serde_json::json!({
                "id": "echo", "name": "echo",
                "nodes": [{"id": "in", "type": "http-in", "path": "/echo", "wires": [[]]}]
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let catalog = InMemoryCatalog::new();
        let loaded = load_dir(&catalog, dir.path()).unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(catalog.flow_ids(), vec!["echo"]);
    }
}
