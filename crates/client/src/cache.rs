//! Short-lived in-memory cache for GET responses.
//!
//! Keys are `<resource>:<tenant>/<store>:<path>?<sorted query>`, so a mutation
//! can drop every cached view of a resource for its tenant with one prefix.
//! Expired entries are evicted lazily on lookup; there is no sweeper task.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ResponseCache {
    ttl: chrono::Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(20)),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached value, or `None` when absent or expired (expired entries are removed).
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Utc::now() => {
                tracing::debug!(key, "cache hit");
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(key);
            tracing::debug!(key, "cache entry expired");
        }
        None
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let entry = CacheEntry {
            key: key.clone(),
            value,
            expires_at: Utc::now()
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.lock().insert(key, entry);
    }

    /// Drop every entry whose key starts with `prefix`; returns how many went.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!(prefix, removed, "cache invalidated");
        }
        removed
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Entries currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache key for a GET of `path` under `scope` (see `Subject::scope`).
///
/// Query parameters are sorted so parameter order never splits the cache.
pub fn cache_key(resource: &str, scope: &str, path: &str, query: &[(String, String)]) -> String {
    let mut params: Vec<&(String, String)> = query.iter().collect();
    params.sort();
    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!("{resource}:{scope}:{path}?{query}")
}

/// Prefix covering every cached entry of `resource` for one tenant, across stores.
pub fn resource_prefix(resource: &str, tenant: &str) -> String {
    format!("{resource}:{tenant}/")
}
