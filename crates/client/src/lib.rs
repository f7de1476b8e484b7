//! `storedesk-client`: resilient client core for the retail-management API.
//!
//! - `config`: env/serde-driven [`ClientConfig`]
//! - `error`: classified [`ApiError`] with trace ids
//! - `transport`: the wire seam ([`Transport`], [`ReqwestTransport`])
//! - `http`: retry/timeout/cancellation loop ([`ResilientClient`])
//! - `idempotency`: double-submit guard and idempotency keys
//! - `cache`: TTL cache for GET responses
//! - `context`: stale-context versions
//! - `session`: per-login state ([`Session`])
//! - `api`: typed operations ([`ApiClient`])

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod idempotency;
pub mod session;
pub mod transport;
pub mod types;

pub use api::ApiClient;
pub use cache::{cache_key, resource_prefix, ResponseCache};
pub use config::{ClientConfig, ConfigError};
pub use context::{ContextStamp, ContextVersions, TENANT_CONTEXT};
pub use error::{classify, ApiError, ApiResult, ErrorCategory, ErrorEnvelope, FailureKind};
pub use http::{ApiResponse, ResilientClient};
pub use idempotency::{
    payload_fingerprint, AttemptKeys, AttemptState, IdempotencyAttempt, IdempotencyIssuer, InFlightGuard,
};
pub use session::Session;
pub use transport::{ApiRequest, RawResponse, ReqwestTransport, Transport, TransportError};
pub use types::{
    EffectivePermissionsResponse, NewStore, NewUser, PermissionEntry, PolicySave, Store, Submission, User,
};
