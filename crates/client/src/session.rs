//! Explicit per-login session state.
//!
//! A [`Session`] owns everything that used to be process-wide: the active
//! subject, its effective permission set, the context versions, the
//! idempotency attempt table and the read cache. Components receive an
//! `Arc<Session>`; two sessions never share any of it.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use storedesk_auth::{EffectivePermissionSet, PermissionKey, Subject};
use tracing::info;

use crate::cache::ResponseCache;
use crate::context::{ContextStamp, ContextVersions, TENANT_CONTEXT};
use crate::error::{ApiError, ApiResult};
use crate::idempotency::IdempotencyIssuer;

#[derive(Debug)]
pub struct Session {
    subject: RwLock<Subject>,
    permissions: RwLock<Arc<EffectivePermissionSet>>,
    contexts: Arc<ContextVersions>,
    issuer: IdempotencyIssuer,
    cache: ResponseCache,
}

impl Session {
    /// Start a session. Permissions are empty (everything denied) until the
    /// first refresh.
    pub fn new(subject: Subject, cache_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            subject: RwLock::new(subject),
            permissions: RwLock::new(Arc::new(EffectivePermissionSet::empty())),
            contexts: ContextVersions::new(),
            issuer: IdempotencyIssuer::new(),
            cache: ResponseCache::new(cache_ttl),
        })
    }

    pub fn subject(&self) -> Subject {
        self.subject
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the current effective set.
    pub fn permissions(&self) -> Arc<EffectivePermissionSet> {
        Arc::clone(&self.permissions.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the effective set wholesale.
    pub fn replace_permissions(&self, permissions: EffectivePermissionSet) {
        let mut current = self
            .permissions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(permissions);
    }

    pub fn is_allowed(&self, key: &PermissionKey) -> bool {
        self.permissions().is_allowed(key)
    }

    /// Local permission gate for an operation; the server still has the final word.
    pub fn require(&self, key: &PermissionKey) -> ApiResult<()> {
        if self.is_allowed(key) {
            Ok(())
        } else {
            Err(ApiError::permission_denied(format!("missing permission '{key}'")))
        }
    }

    /// Move to a new tenant/store context.
    ///
    /// In-flight responses from the old context are discarded on delivery,
    /// the effective set is dropped, the read cache is emptied and unfinished
    /// idempotency attempts are forgotten.
    pub fn switch_context(&self, subject: Subject) {
        let mut current = self.subject.write().unwrap_or_else(PoisonError::into_inner);
        let from = current.scope();
        *current = subject;

        let version = self.contexts.advance(TENANT_CONTEXT);
        self.replace_permissions(EffectivePermissionSet::empty());
        self.cache.clear();
        let dropped_attempts = self.issuer.clear_attempts();

        info!(
            from = %from,
            to = %current.scope(),
            version,
            dropped_attempts,
            "switched session context"
        );
    }

    /// Stamp for a request submitted now.
    pub fn context_stamp(&self) -> ContextStamp {
        self.contexts.stamp(TENANT_CONTEXT)
    }

    pub fn contexts(&self) -> &Arc<ContextVersions> {
        &self.contexts
    }

    pub fn issuer(&self) -> &IdempotencyIssuer {
        &self.issuer
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storedesk_auth::Role;
    use storedesk_core::{StoreId, TenantId, UserId};

    fn subject() -> Subject {
        Subject::new(UserId::new(), TenantId::new(), Role::new("manager"))
    }

    fn session() -> Arc<Session> {
        Session::new(subject(), Duration::from_secs(20))
    }

    #[test]
    fn new_session_denies_everything() {
        let session = session();
        assert!(session.permissions().is_empty());
        assert!(session.require(&PermissionKey::new("stores.create")).is_err());
    }

    #[test]
    fn replace_is_wholesale() {
        let session = session();
        session.replace_permissions(EffectivePermissionSet::from_pairs([
            (PermissionKey::new("stores.create"), true),
            (PermissionKey::new("users.create"), true),
        ]));
        session.replace_permissions(EffectivePermissionSet::from_pairs([(
            PermissionKey::new("stores.create"),
            true,
        )]));

        assert!(session.is_allowed(&PermissionKey::new("stores.create")));
        assert!(!session.is_allowed(&PermissionKey::new("users.create")));
    }

    #[test]
    fn switch_context_resets_state_and_stales_stamps() {
        let session = session();
        session.replace_permissions(EffectivePermissionSet::from_pairs([(
            PermissionKey::new("stores.create"),
            true,
        )]));
        session.cache().set("stores:t/-:/stores?", json!([]));
        let failed = session.issuer().get_or_create_attempt("store-create");
        session.issuer().mark_failed("store-create");
        let stamp = session.context_stamp();

        let next = subject().with_store(StoreId::new());
        session.switch_context(next.clone());

        assert_eq!(session.subject(), next);
        assert!(!stamp.is_current());
        assert!(session.context_stamp().is_current());
        assert!(session.permissions().is_empty());
        assert!(session.cache().is_empty());
        assert!(session.issuer().attempt("store-create").is_none());
        assert_ne!(session.issuer().get_or_create_attempt("store-create"), failed);
    }

    #[test]
    fn sessions_are_isolated() {
        let a = session();
        let b = session();
        a.replace_permissions(EffectivePermissionSet::from_pairs([(
            PermissionKey::new("users.create"),
            true,
        )]));
        assert!(a.issuer().begin("user-create"));

        assert!(!b.is_allowed(&PermissionKey::new("users.create")));
        assert!(b.issuer().begin("user-create"));
    }
}
