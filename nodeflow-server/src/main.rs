use std::collections::HashMap;
use std::sync::Arc;

use nodeflow_core::{InMemoryCatalog, NodeRegistry, SharedCatalog};
use nodeflow_executor::ShardManager;
use nodeflow_server::{build_router, AppState, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::load()?;

    let registry = Arc::new(NodeRegistry::new());
    nodeflow_nodes::register_builtins(&registry);

    let catalog = Arc::new(InMemoryCatalog::new());
    if let Some(dir) = &config.flows_dir {
        let loaded = nodeflow_server::flows::load_dir(&catalog, dir)?;
        tracing::info!(loaded, dir = %dir.display(), "flow catalog seeded");
    }
    let shared_catalog: SharedCatalog = catalog;

    let env: HashMap<String, String> = std::env::vars().collect();
    let manager = Arc::new(
        ShardManager::new(shared_catalog, registry.clone(), config.executor_config())
            .with_env(env),
    );

    let state = AppState {
        manager,
        registry,
        api_prefix: config.api_prefix.clone(),
        version: env!("CARGO_PKG_VERSION"),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!(bind = %config.bind, "nodeflow server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
