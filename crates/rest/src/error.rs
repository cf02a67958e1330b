//! Error types for the REST adapter.
//!
//! Core errors are mapped to HTTP status codes as follows:
//!
//! | Core Error | HTTP Status | Code |
//! |------------|-------------|------|
//! | TenantError::NotFound | 404 | tenant_not_found |
//! | TenantError::Mismatch / Unidentified | 400 | tenant_mismatch / tenant_required |
//! | AccessError::Unauthenticated | 401 | unauthenticated |
//! | AccessError::Denied / OperationNotPermitted | 403 | access_denied |
//! | RateLimitError::Exceeded | 429 | rate_limit_exceeded |
//! | ScopeError::PoolTimeout / ShuttingDown | 503 | unavailable |
//! | ScopeError::WorkTimeout | 504 | timeout |
//! | everything else | 500 | internal |
//!
//! Server-side failures never echo their message to the client. The message
//! is logged and the body carries a generic description.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tenantscope_core::error::{
    AccessError, BackendError, RateLimitError, ScopeError, TenancyError, TenantError,
    ValidationError,
};
use thiserror::Error;
use tracing::error;

use crate::middleware::rate_limit_headers::{
    RETRY_AFTER, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};

/// The primary error type for REST operations.
#[derive(Debug, Error)]
pub enum RestError {
    /// An error raised by the isolation core.
    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    /// Bad request (HTTP 400).
    #[error("bad request: {message}")]
    BadRequest {
        /// Error message.
        message: String,
    },

    /// A dependency is not available (HTTP 503).
    #[error("service unavailable: {message}")]
    ServiceUnavailable {
        /// Error message.
        message: String,
    },

    /// Internal server error (HTTP 500).
    #[error("internal error: {message}")]
    InternalError {
        /// Error message.
        message: String,
    },
}

/// Result type alias for REST operations.
pub type RestResult<T> = Result<T, RestError>;

impl From<TenantError> for RestError {
    fn from(err: TenantError) -> Self {
        RestError::Tenancy(err.into())
    }
}

impl From<AccessError> for RestError {
    fn from(err: AccessError) -> Self {
        RestError::Tenancy(err.into())
    }
}

impl From<RateLimitError> for RestError {
    fn from(err: RateLimitError) -> Self {
        RestError::Tenancy(err.into())
    }
}

impl From<ScopeError> for RestError {
    fn from(err: ScopeError) -> Self {
        RestError::Tenancy(err.into())
    }
}

impl From<BackendError> for RestError {
    fn from(err: BackendError) -> Self {
        RestError::Tenancy(err.into())
    }
}

impl From<ValidationError> for RestError {
    fn from(err: ValidationError) -> Self {
        RestError::BadRequest {
            message: err.to_string(),
        }
    }
}

impl RestError {
    /// Returns the HTTP status and stable error code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            RestError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            RestError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            RestError::InternalError { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            RestError::Tenancy(err) => tenancy_status(err),
        }
    }
}

fn tenancy_status(err: &TenancyError) -> (StatusCode, &'static str) {
    match err {
        TenancyError::Tenant(TenantError::NotFound { .. }) => {
            (StatusCode::NOT_FOUND, "tenant_not_found")
        }
        TenancyError::Tenant(TenantError::Mismatch { .. }) => {
            (StatusCode::BAD_REQUEST, "tenant_mismatch")
        }
        TenancyError::Tenant(TenantError::Unidentified) => {
            (StatusCode::BAD_REQUEST, "tenant_required")
        }
        TenancyError::Access(AccessError::Unauthenticated) => {
            (StatusCode::UNAUTHORIZED, "unauthenticated")
        }
        TenancyError::Access(_) => (StatusCode::FORBIDDEN, "access_denied"),
        TenancyError::RateLimit(RateLimitError::Exceeded { .. }) => {
            (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded")
        }
        TenancyError::Scope(ScopeError::PoolTimeout { .. } | ScopeError::ShuttingDown) => {
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
        TenancyError::Scope(ScopeError::WorkTimeout { .. }) => {
            (StatusCode::GATEWAY_TIMEOUT, "timeout")
        }
        TenancyError::Backend(
            BackendError::Unavailable { .. }
            | BackendError::ConnectionFailed { .. }
            | BackendError::PoolExhausted { .. },
        ) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        TenancyError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        TenancyError::RateLimit(
            RateLimitError::Unconfigured { .. } | RateLimitError::InvalidRule { .. },
        )
        | TenancyError::Scope(_)
        | TenancyError::Backend(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

/// Returns the message safe to show to a client.
fn client_message(err: &RestError, status: StatusCode) -> String {
    match err {
        RestError::Tenancy(TenancyError::Tenant(TenantError::NotFound { .. })) => {
            "tenant not found".to_string()
        }
        RestError::Tenancy(TenancyError::Access(AccessError::Denied { .. })) => {
            "access denied".to_string()
        }
        _ if status.is_server_error() => status
            .canonical_reason()
            .unwrap_or("server error")
            .to_lowercase(),
        _ => err.to_string(),
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if let RestError::Tenancy(TenancyError::RateLimit(
            RateLimitError::Exceeded {
                limit,
                reset_at,
                retry_after_secs,
                ..
            },
        )) = &self
        {
            let reset_secs = (reset_at.timestamp_millis().max(0) as u64).div_ceil(1000);
            let retry_after = *retry_after_secs;

            let mut headers = HeaderMap::new();
            headers.insert(&X_RATELIMIT_LIMIT, HeaderValue::from(*limit));
            headers.insert(&X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
            headers.insert(&X_RATELIMIT_RESET, HeaderValue::from(reset_secs));
            headers.insert(&RETRY_AFTER, HeaderValue::from(retry_after));

            let body = json!({
                "error": code,
                "message": "rate limit exceeded",
                "limit": limit,
                "remaining": 0,
                "resetAt": reset_secs,
            });
            return (status, headers, Json(body)).into_response();
        }

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }

        let body = json!({
            "error": code,
            "message": client_message(&self, status),
        });
        (status, Json(body)).into_response()
    }
}
