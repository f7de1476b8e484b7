//! Wire types for the retail-management API.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storedesk_auth::{
    evaluate, EffectivePermissionSet, Evaluation, PermissionKey, PolicyChangePreview, PolicyLayers,
    Role, Subject,
};
use storedesk_core::{StoreId, TenantId, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// Effective permissions
// ─────────────────────────────────────────────────────────────────────────────

/// One server-computed permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub key: PermissionKey,
    pub allowed: bool,
    /// Layer that decided the key, as reported by the server.
    #[serde(default)]
    pub source: Option<String>,
}

/// Body of `GET /tenants/{tenant}/users/{user}/effective-permissions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivePermissionsResponse {
    /// Server echo of the subject; shape is informational only.
    #[serde(default)]
    pub subject: Value,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
    #[serde(default)]
    pub denies_applied: Vec<Value>,
    #[serde(default)]
    pub sources_trace: PolicyLayers,
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl EffectivePermissionsResponse {
    /// The server's verdicts as a session-ready set.
    pub fn to_effective_set(&self) -> EffectivePermissionSet {
        EffectivePermissionSet::from_pairs(
            self.permissions
                .iter()
                .map(|entry| (entry.key.clone(), entry.allowed)),
        )
    }

    /// Re-resolve `sources_trace` locally for every listed or traced key.
    ///
    /// Drives the explainer panels; decisions carry the full layer trail.
    pub fn local_evaluation(&self, subject: &Subject) -> Evaluation {
        let mut keys = self.sources_trace.mentioned_keys();
        keys.extend(self.permissions.iter().map(|entry| entry.key.clone()));
        evaluate(subject, &self.sources_trace, &keys)
    }

    /// Keys where the server's verdict and the local resolution disagree.
    pub fn mismatches(&self, subject: &Subject) -> BTreeSet<PermissionKey> {
        let local = self.local_evaluation(subject);
        self.permissions
            .iter()
            .filter(|entry| {
                local
                    .decision(&entry.key)
                    .is_some_and(|decision| decision.is_allowed() != entry.allowed)
            })
            .map(|entry| entry.key.clone())
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stores & users
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    pub tenant_id: TenantId,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStore {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl NewStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub store_id: Option<StoreId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<StoreId>,
}

impl NewUser {
    pub fn new(email: impl Into<String>, role: Role) -> Self {
        Self {
            email: email.into(),
            display_name: None,
            role,
            store_id: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_store(mut self, store_id: StoreId) -> Self {
        self.store_id = Some(store_id);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Submission outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a mutating call that passed local checks.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission<T> {
    Completed(T),
    /// The same operation is already running; this submit was dropped.
    AlreadyInFlight,
}

impl<T> Submission<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::AlreadyInFlight => None,
        }
    }
}

/// Outcome of `save_user_policy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PolicySave {
    /// Before and after are identical; nothing was sent.
    NoChanges,
    /// The actor tried to grant keys outside their own effective set.
    Blocked {
        blocked: BTreeSet<PermissionKey>,
        preview: PolicyChangePreview,
    },
    /// The change widens access and must be confirmed first.
    NeedsConfirmation { preview: PolicyChangePreview },
    Saved { preview: PolicyChangePreview },
    AlreadyInFlight,
}
