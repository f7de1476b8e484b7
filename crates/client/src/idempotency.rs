//! Idempotency / transaction key issuance and double-submit tracking.
//!
//! Keys are issued per human-readable operation name (e.g. `"store-create"`).
//! Retries of the same logical attempt reuse the cached pair; a new logical
//! submission needs the attempt cleared first (on success or explicit cancel).
//! Each attempt also remembers a fingerprint of its payload so that reusing an
//! operation name for a different payload is reported as a conflict instead of
//! silently replaying the old key.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ApiError;

/// Lifecycle of one logical submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttemptState {
    Pending,
    Succeeded,
    Failed,
}

/// Keys sent with a mutating request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptKeys {
    pub idempotency_key: String,
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdempotencyAttempt {
    pub operation_name: String,
    pub idempotency_key: String,
    pub transaction_id: String,
    pub state: AttemptState,
    /// SHA-256 of the canonical JSON payload, when one was bound.
    pub fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyAttempt {
    fn mint(operation_name: &str, fingerprint: Option<String>) -> Self {
        Self {
            operation_name: operation_name.to_string(),
            idempotency_key: format!("{operation_name}-{}", Uuid::now_v7().simple()),
            transaction_id: format!("txn-{}", Uuid::now_v7()),
            state: AttemptState::Pending,
            fingerprint,
            created_at: Utc::now(),
        }
    }

    pub fn keys(&self) -> AttemptKeys {
        AttemptKeys {
            idempotency_key: self.idempotency_key.clone(),
            transaction_id: self.transaction_id.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct IssuerState {
    in_flight: HashSet<String>,
    attempts: HashMap<String, IdempotencyAttempt>,
}

/// Attempt table shared by every action in one session.
#[derive(Debug, Default)]
pub struct IdempotencyIssuer {
    state: Mutex<IssuerState>,
}

impl IdempotencyIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IssuerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `operation_name` in flight.
    ///
    /// Returns `false` when it already is, so a rapid second click can be
    /// ignored without surfacing an error.
    pub fn begin(&self, operation_name: &str) -> bool {
        let inserted = self.lock().in_flight.insert(operation_name.to_string());
        if !inserted {
            tracing::debug!(operation = operation_name, "duplicate submit ignored");
        }
        inserted
    }

    /// [`begin`](Self::begin) tied to a guard that calls [`end`](Self::end)
    /// when dropped, including when the submitting future is abandoned.
    pub fn try_begin<'a>(&'a self, operation_name: &str) -> Option<InFlightGuard<'a>> {
        self.begin(operation_name).then(|| InFlightGuard {
            issuer: self,
            operation_name: operation_name.to_string(),
        })
    }

    /// Clear the in-flight mark regardless of outcome.
    pub fn end(&self, operation_name: &str) {
        self.lock().in_flight.remove(operation_name);
    }

    pub fn is_in_flight(&self, operation_name: &str) -> bool {
        self.lock().in_flight.contains(operation_name)
    }

    /// Cached keys for the current logical attempt, or a freshly minted pair.
    pub fn get_or_create_attempt(&self, operation_name: &str) -> AttemptKeys {
        let mut state = self.lock();
        let attempt = state
            .attempts
            .entry(operation_name.to_string())
            .or_insert_with(|| IdempotencyAttempt::mint(operation_name, None));
        attempt.state = AttemptState::Pending;
        attempt.keys()
    }

    /// Like [`get_or_create_attempt`](Self::get_or_create_attempt), but bound
    /// to `payload`: an existing attempt created for a different payload is a
    /// conflict and is left untouched.
    pub fn attempt_for_payload(&self, operation_name: &str, payload: &Value) -> Result<AttemptKeys, ApiError> {
        let fingerprint = payload_fingerprint(payload);
        let mut state = self.lock();

        match state.attempts.get_mut(operation_name) {
            Some(existing) => match &existing.fingerprint {
                Some(previous) if *previous != fingerprint => Err(ApiError::conflict(format!(
                    "operation '{operation_name}' has an unfinished attempt for a different payload; cancel it before submitting new data"
                ))),
                _ => {
                    existing.fingerprint = Some(fingerprint);
                    existing.state = AttemptState::Pending;
                    Ok(existing.keys())
                }
            },
            None => {
                let attempt = IdempotencyAttempt::mint(operation_name, Some(fingerprint));
                let keys = attempt.keys();
                state.attempts.insert(operation_name.to_string(), attempt);
                Ok(keys)
            }
        }
    }

    /// Attempt bound to one concrete request. The fingerprint covers the
    /// method and path as well as the body, so the same payload aimed at a
    /// different tenant's endpoint never inherits an old key.
    pub fn attempt_for_request(
        &self,
        operation_name: &str,
        method: &str,
        path: &str,
        body: &Value,
    ) -> Result<AttemptKeys, ApiError> {
        let target = serde_json::json!({
            "method": method,
            "path": path,
            "body": body,
        });
        self.attempt_for_payload(operation_name, &target)
    }

    /// Keep the attempt (and its keys) for a retry of the same submission.
    pub fn mark_failed(&self, operation_name: &str) {
        if let Some(attempt) = self.lock().attempts.get_mut(operation_name) {
            attempt.state = AttemptState::Failed;
        }
    }

    /// Success: the attempt is finished and its keys must not be reused.
    pub fn complete(&self, operation_name: &str) -> Option<IdempotencyAttempt> {
        let mut attempt = self.lock().attempts.remove(operation_name)?;
        attempt.state = AttemptState::Succeeded;
        Some(attempt)
    }

    /// Explicit user cancel: forget the attempt so the next submit gets new keys.
    pub fn clear_attempt(&self, operation_name: &str) -> bool {
        self.lock().attempts.remove(operation_name).is_some()
    }

    /// Forget every unfinished attempt; used when the session changes context.
    /// In-flight marks stay with their guards.
    pub fn clear_attempts(&self) -> usize {
        let mut state = self.lock();
        let cleared = state.attempts.len();
        state.attempts.clear();
        cleared
    }

    pub fn attempt(&self, operation_name: &str) -> Option<IdempotencyAttempt> {
        self.lock().attempts.get(operation_name).cloned()
    }
}

/// In-flight mark for one operation, released on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    issuer: &'a IdempotencyIssuer,
    operation_name: String,
}

impl InFlightGuard<'_> {
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.issuer.end(&self.operation_name);
    }
}

/// Hex SHA-256 of the payload's canonical JSON encoding (object keys sorted).
pub fn payload_fingerprint(payload: &Value) -> String {
    let canonical = canonicalize(payload).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use serde_json::json;

    #[test]
    fn same_attempt_until_cleared() {
        let issuer = IdempotencyIssuer::new();

        let first = issuer.get_or_create_attempt("store-create");
        let second = issuer.get_or_create_attempt("store-create");
        assert_eq!(first, second);
        assert!(first.idempotency_key.starts_with("store-create-"));
        assert_ne!(first.idempotency_key, first.transaction_id);

        assert!(issuer.clear_attempt("store-create"));
        let third = issuer.get_or_create_attempt("store-create");
        assert_ne!(first, third);
    }

    #[test]
    fn double_submit_guard() {
        let issuer = IdempotencyIssuer::new();

        assert!(issuer.begin("user-create"));
        assert!(!issuer.begin("user-create"));
        issuer.end("user-create");
        assert!(issuer.begin("user-create"));
    }

    #[test]
    fn in_flight_mark_released_when_guard_drops() {
        let issuer = IdempotencyIssuer::new();

        let guard = issuer.try_begin("store-create").unwrap();
        assert!(issuer.try_begin("store-create").is_none());
        assert!(issuer.is_in_flight(guard.operation_name()));

        drop(guard);
        assert!(!issuer.is_in_flight("store-create"));
        assert!(issuer.try_begin("store-create").is_some());
    }

    #[test]
    fn same_body_on_another_path_is_not_the_same_attempt() {
        let issuer = IdempotencyIssuer::new();
        let body = json!({"name": "Main"});

        let first = issuer
            .attempt_for_request("store-create", "POST", "/tenants/a/stores", &body)
            .unwrap();
        issuer.mark_failed("store-create");
        let retry = issuer
            .attempt_for_request("store-create", "POST", "/tenants/a/stores", &body)
            .unwrap();
        assert_eq!(first, retry);

        let err = issuer
            .attempt_for_request("store-create", "POST", "/tenants/b/stores", &body)
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Conflict);
    }

    #[test]
    fn clear_attempts_forgets_everything_unfinished() {
        let issuer = IdempotencyIssuer::new();
        let first = issuer.get_or_create_attempt("store-create");
        issuer.get_or_create_attempt("user-create");
        assert!(issuer.begin("store-create"));

        assert_eq!(issuer.clear_attempts(), 2);
        assert!(issuer.attempt("store-create").is_none());
        assert!(issuer.is_in_flight("store-create"));
        assert_ne!(issuer.get_or_create_attempt("store-create"), first);
    }

    #[test]
    fn guard_is_per_operation() {
        let issuer = IdempotencyIssuer::new();
        assert!(issuer.begin("user-create"));
        assert!(issuer.begin("store-create"));
        assert!(issuer.is_in_flight("user-create"));
    }

    #[test]
    fn failed_attempt_keeps_keys_for_retry() {
        let issuer = IdempotencyIssuer::new();
        let payload = json!({"name": "Main"});

        let first = issuer.attempt_for_payload("store-create", &payload).unwrap();
        issuer.mark_failed("store-create");
        assert_eq!(issuer.attempt("store-create").unwrap().state, AttemptState::Failed);

        let retry = issuer.attempt_for_payload("store-create", &payload).unwrap();
        assert_eq!(first, retry);
        assert_eq!(issuer.attempt("store-create").unwrap().state, AttemptState::Pending);
    }

    #[test]
    fn different_payload_for_unfinished_attempt_conflicts() {
        let issuer = IdempotencyIssuer::new();
        issuer.attempt_for_payload("store-create", &json!({"name": "Main"})).unwrap();

        let err = issuer
            .attempt_for_payload("store-create", &json!({"name": "Outlet"}))
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Conflict);
    }

    #[test]
    fn complete_removes_attempt() {
        let issuer = IdempotencyIssuer::new();
        let keys = issuer.get_or_create_attempt("store-create");

        let done = issuer.complete("store-create").unwrap();
        assert_eq!(done.state, AttemptState::Succeeded);
        assert_eq!(done.keys(), keys);
        assert!(issuer.attempt("store-create").is_none());
        assert_ne!(issuer.get_or_create_attempt("store-create"), keys);
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(payload_fingerprint(&a), payload_fingerprint(&b));
        assert_eq!(payload_fingerprint(&a).len(), 64);
    }
}
