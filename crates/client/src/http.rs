//! HTTP resilience layer: retry policy, per-attempt timeout, trace ids and
//! stale-context cancellation.
//!
//! This is the only place that turns wire outcomes into [`ApiError`]s.
//!
//! - GET is retried on network failures, timeouts and 5xx, up to
//!   `retry_max_attempts`, waiting `retry_backoff_ms * attempt` in between.
//! - Mutations are sent exactly once. Retrying them is the caller's decision,
//!   made safe by reusing the attempt's idempotency key.
//! - 4xx is never retried.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{generate_trace_id, ApiError, ApiResult, TRACE_ID_HEADER};
use crate::transport::{ApiRequest, RawResponse, Transport, TransportError, IDEMPOTENCY_KEY_HEADER};

/// A successful response with its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body (`Null` for an empty body).
    pub body: Value,
    pub trace_id: String,
}

impl ApiResponse {
    fn from_raw(raw: RawResponse) -> ApiResult<Self> {
        let header_trace = raw.header(TRACE_ID_HEADER).map(str::to_string);

        let body: Value = if raw.body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&raw.body).map_err(|e| {
                let err = ApiError::invalid_response(format!("response body is not valid JSON: {e}"));
                match &header_trace {
                    Some(trace) => err.with_trace_id(trace.clone()),
                    None => err,
                }
            })?
        };

        let body_trace = body
            .get("trace_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let trace_id = body_trace
            .or(header_trace)
            .unwrap_or_else(generate_trace_id);

        Ok(Self {
            status: raw.status,
            body,
            trace_id,
        })
    }

    /// Deserialize the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            ApiError::invalid_response(format!("unexpected response shape: {e}"))
                .with_trace_id(self.trace_id.clone())
        })
    }
}

/// Retrying client over a [`Transport`].
///
/// Holds no per-request mutable state: concurrent `send`s run independent
/// retry loops.
#[derive(Debug, Clone)]
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

impl ResilientClient {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn send(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
        if request.is_mutation() && request.header(IDEMPOTENCY_KEY_HEADER).is_none() {
            return Err(ApiError::validation(format!(
                "{} {} is a mutation and must carry an {IDEMPOTENCY_KEY_HEADER} header",
                request.method, request.path
            )));
        }

        let max_attempts = if request.method == reqwest::Method::GET {
            self.config.retry_max_attempts.max(1)
        } else {
            1
        };
        let timeout = self.config.timeout();

        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(timeout, self.transport.execute(&request, timeout)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };

            let result = match outcome {
                Ok(raw) if raw.is_success() => ApiResponse::from_raw(raw),
                Ok(raw) => Err(ApiError::from_response(&raw)),
                Err(err) => Err(ApiError::from_transport(&err)),
            };

            if let Some(stamp) = &request.context {
                if !stamp.is_current() {
                    debug!(
                        method = %request.method,
                        path = %request.path,
                        context = stamp.key(),
                        "dropping response from stale context"
                    );
                    return Err(ApiError::cancelled(stamp.key()));
                }
            }

            match result {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(path = %request.path, attempt, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let backoff = self.config.backoff_for(attempt);
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        error = %err,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying request"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(
                        method = %request.method,
                        path = %request.path,
                        category = %err.category,
                        trace_id = %err.trace_id,
                        "request failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::transport::{ApiRequest, RawResponse, Transport, TransportError};

    /// Transport that replays scripted outcomes and records every request.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedTransport {
        script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        seen: Mutex<Vec<ApiRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new<I>(outcomes: I) -> Self
        where
            I: IntoIterator<Item = Result<RawResponse, TransportError>>,
        {
            Self {
                script: Mutex::new(outcomes.into_iter().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn push(&self, outcome: Result<RawResponse, TransportError>) {
            self.script.lock().unwrap().push_back(outcome);
        }

        pub(crate) fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        pub(crate) fn requests(&self) -> Vec<ApiRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(&self, request: &ApiRequest, _timeout: Duration) -> Result<RawResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("script exhausted".to_string())))
        }
    }
}
