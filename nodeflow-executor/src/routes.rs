//! Two-tier route resolution.
//!
//! Tier 1 is the per-shard cache (entries carry an absolute expiry); tier 2
//! is the Flow Catalog. Positive results are cached, negative results are
//! not, so a newly enabled flow resolves without waiting out a negative
//! entry. The cache is owned exclusively by the shard actor; no locking.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use nodeflow_core::{CatalogError, ResolvedRoute, SharedCatalog};

struct CachedRoute {
    route: ResolvedRoute,
    expiry_epoch_ms: i64,
}

pub struct RouteResolver {
    api_prefix: String,
    ttl_ms: i64,
    cache: HashMap<String, CachedRoute>,
}

impl RouteResolver {
    pub fn new(api_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            api_prefix: api_prefix.into(),
            ttl_ms: ttl.as_millis() as i64,
            cache: HashMap::new(),
        }
    }

    /// Strip the API prefix; the remainder is the flow-facing path.
    pub fn normalise<'a>(&self, path: &'a str) -> &'a str {
        let stripped = path.strip_prefix(self.api_prefix.as_str()).unwrap_or(path);
        if stripped.is_empty() {
            "/"
        } else {
            stripped
        }
    }

    pub async fn resolve(
        &mut self,
        catalog: &SharedCatalog,
        method: &str,
        path: &str,
    ) -> Result<Option<ResolvedRoute>, CatalogError> {
        let normalised = self.normalise(path).to_string();
        let cache_key = format!("{}:{normalised}", method.to_uppercase());
        let now = Utc::now().timestamp_millis();

        if let Some(entry) = self.cache.get(&cache_key) {
            if entry.expiry_epoch_ms > now {
                return Ok(Some(entry.route.clone()));
            }
            self.cache.remove(&cache_key);
        }

        let resolved = catalog.resolve_route(method, &normalised).await?;
        if let Some(route) = &resolved {
            self.cache.insert(
                cache_key,
                CachedRoute {
                    route: route.clone(),
                    expiry_epoch_ms: now + self.ttl_ms,
                },
            );
        }
        Ok(resolved)
    }

    /// Drop cached entries for one flow (catalog invalidation).
    pub fn invalidate_flow(&mut self, flow_id: &str) {
        self.cache.retain(|_, entry| entry.route.flow_id != flow_id);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
