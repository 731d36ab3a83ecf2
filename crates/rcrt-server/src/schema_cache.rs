//! Schema-definition cache (C3): `llm_hints` lookups happen on every
//! breadcrumb fetch, so the `schema.def.v1` record backing a schema name is
//! cached rather than re-queried per request. Grounded on the
//! `SessionGraphCache`'s `RwLock`-guarded map idiom
//! (`rcrt-context-builder/src/graph/cache.rs`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rcrt_core::db::Db;

use crate::transforms::LlmHints;

struct CacheEntry {
    hints: Option<Arc<LlmHints>>,
    loaded_at: Instant,
}

pub struct SchemaCache {
    inner: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl SchemaCache {
    pub fn new() -> Self {
        SchemaCache {
            inner: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(300),
        }
    }

    /// Look up the `llm_hints` a schema definition carries, going to the
    /// database only on a cold or stale entry. Schema definitions are
    /// cross-tenant catalog data (like agent definitions), so no RLS scoping
    /// is applied here.
    pub async fn get_or_load(
        &self,
        db: &Db,
        schema_name: &str,
    ) -> anyhow::Result<Option<Arc<LlmHints>>> {
        if let Some(hit) = self.peek(schema_name) {
            return Ok(hit);
        }

        let hints = match db.get_schema_definition(schema_name).await? {
            Some(def) => def
                .llm_hints
                .and_then(|v| serde_json::from_value::<LlmHints>(v).ok())
                .map(Arc::new),
            None => None,
        };

        self.inner.write().unwrap().insert(
            schema_name.to_string(),
            CacheEntry {
                hints: hints.clone(),
                loaded_at: Instant::now(),
            },
        );

        Ok(hints)
    }

    fn peek(&self, schema_name: &str) -> Option<Option<Arc<LlmHints>>> {
        let guard = self.inner.read().unwrap();
        let entry = guard.get(schema_name)?;
        if entry.loaded_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.hints.clone())
    }

    pub fn invalidate(&self, schema_name: &str) {
        self.inner.write().unwrap().remove(schema_name);
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}
