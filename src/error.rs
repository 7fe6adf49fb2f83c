//! Error types for the gateway.

use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::routing::Dependency;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors a caller can see. Each maps to an HTTP status and a stable `code`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("authentication required")]
    AuthRequired,

    #[error("forbidden")]
    PermissionDenied,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("Query limit exceeded (max {max_limit})")]
    QueryLimitExceeded { max_limit: usize },

    #[error("invalid or missing API key")]
    InvalidApiKey,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("record store unavailable")]
    StoreUnavailable,
}

impl GateError {
    /// Stable machine-readable code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::RateLimitExceeded => "RATE_LIMITED",
            Self::QueryLimitExceeded { .. } => "QUERY_LIMIT_EXCEEDED",
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::AuthRequired | Self::InvalidApiKey => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::QueryLimitExceeded { .. } | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// A gate error bound to the trace id of the request it rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error}")]
pub struct Rejection {
    pub error: GateError,
    pub trace_id: Option<String>,
}

impl Rejection {
    pub fn new(error: GateError, trace_id: Option<String>) -> Self {
        Self { error, trace_id }
    }
}

impl From<GateError> for Rejection {
    fn from(error: GateError) -> Self {
        Self {
            error,
            trace_id: None,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "error": self.error.to_string(),
            "code": self.error.code(),
        });
        if let Some(trace_id) = &self.trace_id {
            body["trace_id"] = serde_json::json!(trace_id);
        }
        if let GateError::QueryLimitExceeded { max_limit } = &self.error {
            body["max_limit"] = serde_json::json!(max_limit);
        }
        (self.error.status(), Json(body)).into_response()
    }
}

/// Failures talking to a real dependency. Always absorbed by the adapter
/// fallback, never returned to a caller.
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("{dependency} has no real endpoint configured")]
    NotConfigured { dependency: Dependency },

    #[error("{dependency} timed out after {timeout:?}")]
    Timeout {
        dependency: Dependency,
        timeout: Duration,
    },

    #[error("{dependency} returned HTTP {status}")]
    BadStatus {
        dependency: Dependency,
        status: u16,
    },

    #[error("{dependency} request failed: {reason}")]
    Unavailable {
        dependency: Dependency,
        reason: String,
    },

    #[error("Invalid response from {dependency}: {reason}")]
    InvalidResponse {
        dependency: Dependency,
        reason: String,
    },
}

impl DependencyError {
    /// Classify a reqwest failure for the given dependency.
    pub fn from_reqwest(dependency: Dependency, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                dependency,
                timeout,
            }
        } else if let Some(status) = err.status() {
            Self::BadStatus {
                dependency,
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            Self::InvalidResponse {
                dependency,
                reason: err.to_string(),
            }
        } else {
            Self::Unavailable {
                dependency,
                reason: err.to_string(),
            }
        }
    }
}

/// Record and audit persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_errors_have_stable_codes_and_statuses() {
        assert_eq!(GateError::AuthRequired.code(), "AUTH_REQUIRED");
        assert_eq!(GateError::AuthRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GateError::PermissionDenied.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            GateError::RateLimitExceeded.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(GateError::InvalidApiKey.code(), "INVALID_API_KEY");
    }

    #[test]
    fn messages_match_wire_contract() {
        assert_eq!(GateError::RateLimitExceeded.to_string(), "rate limit exceeded");
        assert_eq!(GateError::PermissionDenied.to_string(), "forbidden");
        assert_eq!(
            GateError::InvalidApiKey.to_string(),
            "invalid or missing API key"
        );
        assert_eq!(
            GateError::QueryLimitExceeded { max_limit: 50 }.to_string(),
            "Query limit exceeded (max 50)"
        );
    }

    #[test]
    fn rejection_response_carries_status() {
        let resp = Rejection::new(GateError::RateLimitExceeded, Some("abc".into())).into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
