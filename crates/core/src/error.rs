//! Error types for the tenant isolation core.
//!
//! Errors are organised in a hierarchy that separates tenant resolution,
//! access control, rate limiting, scope management, validation and backend
//! failures. [`TenancyError`] is the umbrella type returned by most public
//! operations; each category converts into it with `?`.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::resolver::TenantSource;
use crate::tenant::{PrincipalId, Role, Operation, TenantId};

/// The primary error type for tenant isolation operations.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// Tenant resolution errors
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Principal authorization errors
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Rate limiting errors
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// Scoped connection errors
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// Input and configuration validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl TenancyError {
    /// Returns `true` for errors that indicate the isolation contract was at
    /// risk. These must abort the request and are never retried.
    pub fn is_isolation_violation(&self) -> bool {
        matches!(
            self,
            TenancyError::Tenant(TenantError::Mismatch { .. })
                | TenancyError::Scope(ScopeError::ContextSetFailure { .. })
                | TenancyError::Scope(ScopeError::NestedScopeViolation { .. })
        )
    }

    /// Returns `true` if the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            TenancyError::RateLimit(RateLimitError::Exceeded { .. }) => true,
            TenancyError::Scope(ScopeError::PoolTimeout { .. }) => true,
            TenancyError::Backend(BackendError::Unavailable { .. })
            | TenancyError::Backend(BackendError::PoolExhausted { .. }) => true,
            _ => false,
        }
    }

    /// Returns `true` if the error was caused by the request rather than
    /// by the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TenancyError::Tenant(_)
                | TenancyError::Access(_)
                | TenancyError::RateLimit(RateLimitError::Exceeded { .. })
        )
    }
}

/// Errors raised while mapping a request to a tenant.
#[derive(Error, Debug)]
pub enum TenantError {
    /// No active tenant matches the slug. Suspended tenants report this too.
    #[error("tenant not found: {slug}")]
    NotFound { slug: String },

    /// Two tenant signals in the same request disagree.
    #[error(
        "tenant mismatch: {primary_source} carries '{primary_slug}' but {conflicting_source} carries '{conflicting_slug}'"
    )]
    Mismatch {
        primary_slug: String,
        primary_source: TenantSource,
        conflicting_slug: String,
        conflicting_source: TenantSource,
    },

    /// The request carried no tenant signal at all.
    #[error("no tenant identified for request")]
    Unidentified,
}

/// Errors raised while authorizing a principal for a tenant.
#[derive(Error, Debug)]
pub enum AccessError {
    /// The principal has no role mapping for the tenant.
    #[error("access denied: principal {principal_id} has no role in tenant {tenant_id}")]
    Denied {
        principal_id: PrincipalId,
        tenant_id: TenantId,
    },

    /// The principal's role does not permit the requested operation.
    #[error("operation {operation} not permitted for role {role}")]
    OperationNotPermitted { role: Role, operation: Operation },

    /// The request carried no authenticated principal.
    #[error("no authenticated principal")]
    Unauthenticated,
}

/// Errors raised by the rate limiter.
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// The tenant exhausted its quota for the current window.
    #[error("rate limit exceeded for {operation}: limit {limit}, resets at {reset_at}")]
    Exceeded {
        tenant_id: TenantId,
        operation: String,
        limit: u32,
        reset_at: DateTime<Utc>,
        /// Whole seconds until `reset_at`, measured on the limiter's clock.
        retry_after_secs: u64,
    },

    /// No rule covers the operation and no default rule exists.
    #[error("no rate limit rule configured for operation {operation}")]
    Unconfigured { operation: String },

    /// The rule covering the operation cannot be applied.
    #[error("invalid rate limit rule for class {class}: {message}")]
    InvalidRule { class: String, message: String },
}

impl RateLimitError {
    /// Seconds until the client may retry, if known.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RateLimitError::Exceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            RateLimitError::Unconfigured { .. } | RateLimitError::InvalidRule { .. } => None,
        }
    }
}

/// Errors raised while opening, running or closing a tenant scope.
#[derive(Error, Debug)]
pub enum ScopeError {
    /// The isolation variable could not be applied. The connection was discarded.
    #[error("failed to set isolation context for tenant {tenant_id}: {message}")]
    ContextSetFailure { tenant_id: String, message: String },

    /// A scope for a different tenant was opened inside an active scope.
    #[error("nested scope for tenant {requested} inside active scope for tenant {active}")]
    NestedScopeViolation { active: TenantId, requested: TenantId },

    /// No pooled connection became available in time.
    #[error("timed out after {timeout_ms}ms waiting for a pooled connection")]
    PoolTimeout { timeout_ms: u64 },

    /// The scoped work ran past its deadline and was torn down.
    #[error("scope for tenant {tenant_id} exceeded {timeout_ms}ms and was torn down")]
    WorkTimeout { tenant_id: TenantId, timeout_ms: u64 },

    /// The manager is draining and refuses new scopes.
    #[error("scope manager is shutting down")]
    ShuttingDown,
}

/// Errors related to input and configuration validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A tenant identifier failed format validation.
    #[error("invalid tenant id '{value}': {reason}")]
    InvalidTenantId { value: String, reason: String },

    /// A tenant slug failed format validation.
    #[error("invalid tenant slug '{value}'")]
    InvalidSlug { value: String },

    /// The isolation variable name is not usable by the storage engine.
    #[error("invalid isolation variable name '{name}'")]
    InvalidIsolationKey { name: String },

    /// A table or column identifier is not safe to interpolate.
    #[error("invalid identifier '{identifier}'")]
    InvalidIdentifier { identifier: String },

    /// A configuration value is out of range or malformed.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Missing required field.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is currently unavailable.
    #[error("backend unavailable: {backend_name}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// Schema migration error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Errors raised by an external counter store.
#[derive(Error, Debug)]
pub enum CounterStoreError {
    /// The store could not be reached.
    #[error("counter store unavailable: {message}")]
    Unavailable { message: String },

    /// The store did not answer in time.
    #[error("counter store timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The store rejected or failed a command.
    #[error("counter store command failed: {message}")]
    Command { message: String },
}

/// Result type alias for tenant isolation operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

// Implement conversions from common error types

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::SerializationError {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for BackendError {
    fn from(_err: r2d2::Error) -> Self {
        BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for BackendError {
    fn from(err: tokio_postgres::Error) -> Self {
        BackendError::Internal {
            backend_name: "postgres".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for TenancyError {
    fn from(err: rusqlite::Error) -> Self {
        TenancyError::Backend(err.into())
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for TenancyError {
    fn from(err: tokio_postgres::Error) -> Self {
        TenancyError::Backend(err.into())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CounterStoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            CounterStoreError::Unavailable {
                message: err.to_string(),
            }
        } else {
            CounterStoreError::Command {
                message: err.to_string(),
            }
        }
    }
}
