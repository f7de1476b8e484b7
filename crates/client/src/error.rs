//! Error taxonomy: every failure reaching a caller is one `ApiError` with a
//! fixed category and a trace id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::transport::{RawResponse, TransportError};

/// Response header that may carry the server's trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Fixed set of failure categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    PermissionDenied,
    /// Idempotency or version conflict.
    Conflict,
    NotFound,
    Network,
    Timeout,
    /// 5xx.
    Server,
    /// Response discarded because its tenant/store context is stale.
    Cancelled,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::PermissionDenied => "permission_denied",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Server => "server",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Transient categories: retried automatically for reads only.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Server
        )
    }
}

impl core::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a `send` failed, in transport terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Timeout,
    Http4xx(u16),
    Http5xx(u16),
    Cancelled,
    /// Rejected on the client before anything was sent.
    Local,
}

/// Error envelope returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Classified client error.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{category}: {message} (trace {trace_id})")]
pub struct ApiError {
    pub category: ErrorCategory,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
    /// Server error code, when present.
    pub code: Option<String>,
    pub message: String,
    pub details: Option<Value>,
    pub trace_id: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Locally produced error with a freshly generated trace id.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            status: None,
            code: None,
            message: message.into(),
            details: None,
            trace_id: generate_trace_id(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::PermissionDenied, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Conflict, message)
    }

    pub fn cancelled(context_key: &str) -> Self {
        Self::new(
            ErrorCategory::Cancelled,
            format!("response discarded: '{context_key}' context changed while the request was in flight"),
        )
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unknown, message)
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::new(ErrorCategory::Timeout, "request timed out"),
            TransportError::Network(msg) => Self::new(ErrorCategory::Network, msg.clone()),
        }
    }

    /// Classify a non-success response.
    ///
    /// The body is parsed as an [`ErrorEnvelope`] when possible; otherwise the
    /// raw text becomes the message. The trace id comes from the body, then the
    /// `X-Trace-ID` header, then is generated locally.
    pub fn from_response(response: &RawResponse) -> Self {
        let envelope: Option<ErrorEnvelope> = serde_json::from_str(&response.body).ok();

        let (code, message, details, body_trace) = match envelope {
            Some(env) => (Some(env.code), env.message, env.details, env.trace_id),
            None => {
                let text = response.body.trim();
                let message = if text.is_empty() {
                    format!("HTTP {}", response.status)
                } else {
                    text.to_string()
                };
                (None, message, None, None)
            }
        };

        let category = classify(Some(response.status), code.as_deref(), &message);
        let trace_id = body_trace
            .or_else(|| response.header(TRACE_ID_HEADER).map(str::to_string))
            .unwrap_or_else(generate_trace_id);

        Self {
            category,
            status: Some(response.status),
            code,
            message,
            details,
            trace_id,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match (self.category, self.status) {
            (ErrorCategory::Cancelled, _) => FailureKind::Cancelled,
            (_, Some(status)) if status >= 500 => FailureKind::Http5xx(status),
            (_, Some(status)) => FailureKind::Http4xx(status),
            (ErrorCategory::Timeout, None) => FailureKind::Timeout,
            (ErrorCategory::Network, None) => FailureKind::Network,
            (_, None) => FailureKind::Local,
        }
    }

    /// Whether the transport may retry this failure for an idempotent read.
    ///
    /// Decided by what happened on the wire: a response below 500 is never
    /// retried, whatever category its status, code or message maps to.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.failure_kind(),
            FailureKind::Network | FailureKind::Timeout | FailureKind::Http5xx(_)
        )
    }

    /// Whether a UI should offer a retry button.
    ///
    /// Only transient failures qualify, and only when the operation is
    /// idempotent (a read, or a mutation that reuses its idempotency key).
    pub fn offers_retry(&self, idempotent: bool) -> bool {
        self.category.is_transient() && idempotent
    }
}

/// Classify from status first, then server error code, then message text.
pub fn classify(status: Option<u16>, code: Option<&str>, message: &str) -> ErrorCategory {
    if let Some(category) = status.and_then(classify_status) {
        return category;
    }
    if let Some(category) = code.and_then(classify_code) {
        return category;
    }
    classify_message(message).unwrap_or(ErrorCategory::Unknown)
}

fn classify_status(status: u16) -> Option<ErrorCategory> {
    match status {
        400 | 422 => Some(ErrorCategory::Validation),
        401 | 403 => Some(ErrorCategory::PermissionDenied),
        404 | 410 => Some(ErrorCategory::NotFound),
        409 | 412 => Some(ErrorCategory::Conflict),
        408 => Some(ErrorCategory::Timeout),
        500..=599 => Some(ErrorCategory::Server),
        _ => None,
    }
}

fn classify_code(code: &str) -> Option<ErrorCategory> {
    let code = code.to_ascii_lowercase();
    if code.contains("validation") || code.contains("invalid") {
        Some(ErrorCategory::Validation)
    } else if code.contains("permission") || code.contains("forbidden") || code.contains("unauthorized") {
        Some(ErrorCategory::PermissionDenied)
    } else if code.contains("conflict") || code.contains("idempotency") || code.contains("duplicate") {
        Some(ErrorCategory::Conflict)
    } else if code.contains("not_found") {
        Some(ErrorCategory::NotFound)
    } else if code.contains("timeout") {
        Some(ErrorCategory::Timeout)
    } else {
        None
    }
}

fn classify_message(message: &str) -> Option<ErrorCategory> {
    let message = message.to_ascii_lowercase();
    if message.contains("timed out") || message.contains("timeout") {
        Some(ErrorCategory::Timeout)
    } else if message.contains("connection") || message.contains("network") || message.contains("unreachable") {
        Some(ErrorCategory::Network)
    } else if message.contains("permission") || message.contains("forbidden") || message.contains("not allowed") {
        Some(ErrorCategory::PermissionDenied)
    } else if message.contains("not found") {
        Some(ErrorCategory::NotFound)
    } else if message.contains("already exists") || message.contains("conflict") {
        Some(ErrorCategory::Conflict)
    } else if message.contains("invalid") || message.contains("required") {
        Some(ErrorCategory::Validation)
    } else {
        None
    }
}

/// Locally generated trace id for failures the server never saw.
pub fn generate_trace_id() -> String {
    format!("local-{}", Uuid::now_v7())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str, trace_header: Option<&str>) -> RawResponse {
        let mut raw = RawResponse::new(status, body);
        if let Some(trace) = trace_header {
            raw = raw.with_header(TRACE_ID_HEADER, trace);
        }
        raw
    }

    #[test]
    fn status_wins_over_code_and_message() {
        assert_eq!(classify(Some(403), Some("validation_error"), "invalid"), ErrorCategory::PermissionDenied);
        assert_eq!(classify(Some(503), None, "not found"), ErrorCategory::Server);
        assert_eq!(classify(Some(409), None, ""), ErrorCategory::Conflict);
    }

    #[test]
    fn code_then_message_for_unmapped_status() {
        assert_eq!(classify(Some(429), Some("idempotency_key_reused"), ""), ErrorCategory::Conflict);
        assert_eq!(classify(None, None, "Store already exists"), ErrorCategory::Conflict);
        assert_eq!(classify(None, Some("weird"), "nothing useful"), ErrorCategory::Unknown);
    }

    #[test]
    fn envelope_trace_id_preferred_over_header() {
        let body = r#"{"code":"conflict","message":"duplicate","trace_id":"srv-1"}"#;
        let err = ApiError::from_response(&response(409, body, Some("hdr-1")));
        assert_eq!(err.category, ErrorCategory::Conflict);
        assert_eq!(err.code.as_deref(), Some("conflict"));
        assert_eq!(err.trace_id, "srv-1");
    }

    #[test]
    fn header_trace_id_used_when_body_has_none() {
        let err = ApiError::from_response(&response(500, "upstream exploded", Some("hdr-2")));
        assert_eq!(err.category, ErrorCategory::Server);
        assert_eq!(err.message, "upstream exploded");
        assert_eq!(err.trace_id, "hdr-2");
        assert_eq!(err.failure_kind(), FailureKind::Http5xx(500));
    }

    #[test]
    fn trace_id_generated_when_absent() {
        let err = ApiError::from_response(&response(404, "", None));
        assert_eq!(err.category, ErrorCategory::NotFound);
        assert!(err.trace_id.starts_with("local-"));
        assert_eq!(err.message, "HTTP 404");
    }

    #[test]
    fn retry_affordance_needs_transient_and_idempotent() {
        let server = ApiError::new(ErrorCategory::Server, "boom");
        assert!(server.offers_retry(true));
        assert!(!server.offers_retry(false));
        assert!(!ApiError::validation("bad").offers_retry(true));
    }

    #[test]
    fn client_error_responses_are_never_retryable() {
        let request_timeout = ApiError::from_response(&response(408, "", None));
        assert_eq!(request_timeout.category, ErrorCategory::Timeout);
        assert!(!request_timeout.is_retryable());

        let throttled = ApiError::from_response(&response(
            429,
            r#"{"code":"upstream_timeout","message":"connection pool exhausted"}"#,
            None,
        ));
        assert_eq!(throttled.category, ErrorCategory::Timeout);
        assert!(!throttled.is_retryable());

        assert!(ApiError::from_response(&response(503, "", None)).is_retryable());
    }

    #[test]
    fn transport_errors_map_to_transient_categories() {
        let timeout = ApiError::from_transport(&TransportError::Timeout);
        assert_eq!(timeout.failure_kind(), FailureKind::Timeout);
        let network = ApiError::from_transport(&TransportError::Network("refused".into()));
        assert_eq!(network.failure_kind(), FailureKind::Network);
        assert!(network.is_retryable());
    }
}
