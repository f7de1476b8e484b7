//! Typed operations against the retail-management API.
//!
//! Reads go through the session's response cache. Every mutation follows the
//! same path: local permission gate, double-submit guard, idempotency attempt,
//! single send, then cache invalidation on success.

use std::collections::BTreeSet;
use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use storedesk_auth::{build_policy_change_preview, EffectivePermissionSet, PermissionKey, PolicyLayer};
use storedesk_core::UserId;
use tracing::{info, warn};

use crate::cache::{cache_key, resource_prefix};
use crate::config::ClientConfig;
use crate::context::ContextStamp;
use crate::error::{ApiError, ApiResult};
use crate::http::ResilientClient;
use crate::session::Session;
use crate::transport::{ApiRequest, ReqwestTransport, Transport};
use crate::types::{
    EffectivePermissionsResponse, NewStore, NewUser, PolicySave, Store, Submission, User,
};

pub const STORES_CREATE: &str = "stores.create";
pub const USERS_CREATE: &str = "users.create";
pub const USERS_PERMISSIONS_MANAGE: &str = "users.permissions.manage";

const STORES_RESOURCE: &str = "stores";
const USERS_RESOURCE: &str = "users";

/// One mutating call, described before it is gated and sent.
#[derive(Debug, Clone)]
struct Mutation {
    operation: String,
    permission: &'static str,
    method: Method,
    path: String,
    body: Value,
    /// Endpoint accepts a `transaction_id` body field.
    transaction_field: bool,
    invalidates: &'static [&'static str],
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: ResilientClient,
    session: Arc<Session>,
}

impl ApiClient {
    /// Client over the production `reqwest` transport.
    pub fn new(config: ClientConfig, session: Arc<Session>) -> ApiResult<Self> {
        config
            .validate()
            .map_err(|e| ApiError::validation(e.to_string()))?;
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(Arc::new(transport), config, session))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig, session: Arc<Session>) -> Self {
        Self {
            http: ResilientClient::new(transport, config),
            session,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    // ─────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────

    pub async fn fetch_effective_permissions(&self) -> ApiResult<EffectivePermissionsResponse> {
        self.fetch_effective_permissions_for(self.session.context_stamp()).await
    }

    async fn fetch_effective_permissions_for(&self, stamp: ContextStamp) -> ApiResult<EffectivePermissionsResponse> {
        let subject = self.session.subject();

        let mut request = ApiRequest::get(format!(
            "/tenants/{}/users/{}/effective-permissions",
            subject.tenant_id, subject.user_id
        ));
        if let Some(store_id) = subject.store_id {
            request = request.with_query("store_id", store_id.to_string());
        }

        let response = self.http.send(request.with_context(stamp)).await?;
        response.json()
    }

    /// Fetch the effective set and install it as the session's, replacing
    /// whatever was there.
    pub async fn refresh_permissions(&self) -> ApiResult<Arc<EffectivePermissionSet>> {
        let stamp = self.session.context_stamp();
        let response = self.fetch_effective_permissions_for(stamp.clone()).await?;
        self.install_permissions(&stamp, &response)
    }

    /// Install a fetched set unless the context moved on since `stamp`.
    fn install_permissions(
        &self,
        stamp: &ContextStamp,
        response: &EffectivePermissionsResponse,
    ) -> ApiResult<Arc<EffectivePermissionSet>> {
        if !stamp.is_current() {
            return Err(ApiError::cancelled(stamp.key()));
        }
        let subject = self.session.subject();

        let mismatches = response.mismatches(&subject);
        if !mismatches.is_empty() {
            warn!(
                keys = ?mismatches,
                trace_id = response.trace_id.as_deref().unwrap_or("-"),
                "server permissions disagree with local resolution of sources_trace"
            );
        }

        self.session.replace_permissions(response.to_effective_set());
        let permissions = self.session.permissions();
        info!(
            scope = %subject.scope(),
            allowed = permissions.allowed_keys().len(),
            total = permissions.len(),
            "refreshed effective permissions"
        );
        Ok(permissions)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Stores
    // ─────────────────────────────────────────────────────────────────────

    pub async fn list_stores(&self) -> ApiResult<Vec<Store>> {
        let tenant_id = self.session.subject().tenant_id;
        self.get_cached(STORES_RESOURCE, ApiRequest::get(format!("/tenants/{tenant_id}/stores")))
            .await
    }

    pub async fn create_store(&self, store: &NewStore) -> ApiResult<Submission<Store>> {
        let tenant_id = self.session.subject().tenant_id;
        let submission = self
            .mutate(Mutation {
                operation: "store-create".to_string(),
                permission: STORES_CREATE,
                method: Method::POST,
                path: format!("/tenants/{tenant_id}/stores"),
                body: to_body(store)?,
                transaction_field: true,
                invalidates: &[STORES_RESOURCE],
            })
            .await?;
        decode_submission(submission)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────

    pub async fn list_users(&self) -> ApiResult<Vec<User>> {
        let tenant_id = self.session.subject().tenant_id;
        self.get_cached(USERS_RESOURCE, ApiRequest::get(format!("/tenants/{tenant_id}/users")))
            .await
    }

    pub async fn create_user(&self, user: &NewUser) -> ApiResult<Submission<User>> {
        let tenant_id = self.session.subject().tenant_id;
        let submission = self
            .mutate(Mutation {
                operation: "user-create".to_string(),
                permission: USERS_CREATE,
                method: Method::POST,
                path: format!("/tenants/{tenant_id}/users"),
                body: to_body(user)?,
                transaction_field: true,
                invalidates: &[USERS_RESOURCE],
            })
            .await?;
        decode_submission(submission)
    }

    /// Persist a user-level policy edit.
    ///
    /// Nothing is sent when the edit is empty, when it would grant keys the
    /// acting session does not hold, or when it widens access and
    /// `confirmed` is false.
    pub async fn save_user_policy(
        &self,
        user_id: UserId,
        before: &PolicyLayer,
        after: &PolicyLayer,
        confirmed: bool,
    ) -> ApiResult<PolicySave> {
        self.session.require(&PermissionKey::new(USERS_PERMISSIONS_MANAGE))?;

        let preview = build_policy_change_preview(before, after);
        if preview.is_empty() {
            return Ok(PolicySave::NoChanges);
        }

        let blocked: BTreeSet<PermissionKey> = self.session.permissions().ceiling_violations(&preview.allow_added);
        if !blocked.is_empty() {
            warn!(user_id = %user_id, blocked = ?blocked, "policy edit exceeds the actor's own permissions");
            return Ok(PolicySave::Blocked { blocked, preview });
        }

        if preview.requires_confirmation() && !confirmed {
            return Ok(PolicySave::NeedsConfirmation { preview });
        }

        let tenant_id = self.session.subject().tenant_id;
        let submission = self
            .mutate(Mutation {
                operation: format!("user-policy-update:{user_id}"),
                permission: USERS_PERMISSIONS_MANAGE,
                method: Method::PUT,
                path: format!("/tenants/{tenant_id}/users/{user_id}/policy"),
                body: to_body(after)?,
                transaction_field: true,
                invalidates: &[USERS_RESOURCE],
            })
            .await?;

        Ok(match submission {
            Submission::Completed(_) => PolicySave::Saved { preview },
            Submission::AlreadyInFlight => PolicySave::AlreadyInFlight,
        })
    }

    /// Give up on a failed mutation so the next submit mints new keys.
    pub fn cancel_attempt(&self, operation: &str) -> bool {
        self.session.issuer().clear_attempt(operation)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Plumbing
    // ─────────────────────────────────────────────────────────────────────

    async fn get_cached<T: DeserializeOwned>(&self, resource: &str, request: ApiRequest) -> ApiResult<T> {
        let stamp = self.session.context_stamp();
        let scope = self.session.subject().scope();
        let key = cache_key(resource, &scope, &request.path, &request.query);

        let cache = self.session.cache();
        let body = match cache.get(&key) {
            Some(body) => body,
            None => {
                let response = self.http.send(request.with_context(stamp.clone())).await?;
                if stamp.is_current() {
                    cache.set(key, response.body.clone());
                }
                response.body
            }
        };

        serde_json::from_value(body)
            .map_err(|e| ApiError::invalid_response(format!("unexpected {resource} payload: {e}")))
    }

    async fn mutate(&self, mutation: Mutation) -> ApiResult<Submission<Value>> {
        self.session.require(&PermissionKey::new(mutation.permission))?;

        let Some(_in_flight) = self.session.issuer().try_begin(&mutation.operation) else {
            return Ok(Submission::AlreadyInFlight);
        };

        self.submit(&mutation).await.map(Submission::Completed)
    }

    async fn submit(&self, mutation: &Mutation) -> ApiResult<Value> {
        let issuer = self.session.issuer();
        let stamp = self.session.context_stamp();
        let tenant_id = self.session.subject().tenant_id.to_string();

        let keys = issuer.attempt_for_request(
            &mutation.operation,
            mutation.method.as_str(),
            &mutation.path,
            &mutation.body,
        )?;
        let request = ApiRequest::new(mutation.method.clone(), mutation.path.clone())
            .with_body(mutation.body.clone())
            .with_idempotency(&keys, mutation.transaction_field)
            .with_context(stamp);

        match self.http.send(request).await {
            Ok(response) => {
                issuer.complete(&mutation.operation);
                for resource in mutation.invalidates {
                    self.session
                        .cache()
                        .invalidate_prefix(&resource_prefix(resource, &tenant_id));
                }
                info!(
                    operation = %mutation.operation,
                    idempotency_key = %keys.idempotency_key,
                    trace_id = %response.trace_id,
                    "mutation applied"
                );
                Ok(response.body)
            }
            Err(err) => {
                issuer.mark_failed(&mutation.operation);
                warn!(
                    operation = %mutation.operation,
                    idempotency_key = %keys.idempotency_key,
                    category = %err.category,
                    trace_id = %err.trace_id,
                    retry_offered = err.offers_retry(true),
                    "mutation failed"
                );
                Err(err)
            }
        }
    }
}

fn to_body<T: Serialize>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value).map_err(|e| ApiError::validation(format!("cannot encode request body: {e}")))
}

fn decode_submission<T: DeserializeOwned>(submission: Submission<Value>) -> ApiResult<Submission<T>> {
    match submission {
        Submission::Completed(body) => serde_json::from_value(body)
            .map(Submission::Completed)
            .map_err(|e| ApiError::invalid_response(format!("unexpected response shape: {e}"))),
        Submission::AlreadyInFlight => Ok(Submission::AlreadyInFlight),
    }
}
