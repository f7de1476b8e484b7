//! Monotonic context versions for stale-response cancellation.
//!
//! Every request captures a [`ContextStamp`] at submit time. When the user
//! switches tenant/store the version for that context key advances, and any
//! response carrying an older stamp is discarded on delivery. Nothing is
//! aborted on the wire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Context key advanced on tenant/store switches.
pub const TENANT_CONTEXT: &str = "tenant";

/// Version counter per context key.
#[derive(Debug, Default)]
pub struct ContextVersions {
    versions: Mutex<HashMap<String, u64>>,
}

impl ContextVersions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current version (0 for a key never advanced).
    pub fn current(&self, key: &str) -> u64 {
        let versions = self.versions.lock().unwrap_or_else(PoisonError::into_inner);
        versions.get(key).copied().unwrap_or(0)
    }

    /// Move `key` to a new version and return it.
    pub fn advance(&self, key: &str) -> u64 {
        let mut versions = self.versions.lock().unwrap_or_else(PoisonError::into_inner);
        let version = versions.entry(key.to_string()).or_insert(0);
        *version += 1;
        *version
    }

    /// Capture the current version of `key`.
    pub fn stamp(self: &Arc<Self>, key: &str) -> ContextStamp {
        ContextStamp {
            key: key.to_string(),
            version: self.current(key),
            versions: Arc::clone(self),
        }
    }
}

/// Version of one context key as seen when a request was submitted.
#[derive(Debug, Clone)]
pub struct ContextStamp {
    key: String,
    version: u64,
    versions: Arc<ContextVersions>,
}

impl ContextStamp {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// False once the context has moved on since the stamp was taken.
    pub fn is_current(&self) -> bool {
        self.versions.current(&self.key) == self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_goes_stale_after_advance() {
        let versions = ContextVersions::new();
        let stamp = versions.stamp(TENANT_CONTEXT);
        assert!(stamp.is_current());

        assert_eq!(versions.advance(TENANT_CONTEXT), 1);
        assert!(!stamp.is_current());
        assert!(versions.stamp(TENANT_CONTEXT).is_current());
    }

    #[test]
    fn keys_are_independent() {
        let versions = ContextVersions::new();
        let tenant = versions.stamp(TENANT_CONTEXT);
        versions.advance("report-filter");
        assert!(tenant.is_current());
        assert_eq!(versions.current("report-filter"), 1);
    }
}
