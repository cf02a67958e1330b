//! Tenant Isolation Core
//!
//! This crate guarantees that every database operation performed while
//! servicing a request is scoped to exactly one tenant, even though storage
//! connections come from a shared pool and are reused across unrelated
//! requests.
//!
//! # Components
//!
//! Per request, the components run in this order:
//!
//! ```text
//! TenantResolver -> AccessValidator -> RateLimiter
//!     -> ScopedContextManager::with_tenant_scope(tenant, work)
//!     -> AuditRecorder (mutations only)
//! ```
//!
//! - [`resolver`] - maps header, path and session signals to a tenant
//! - [`access`] - confirms the principal holds a role in the tenant
//! - [`rate_limit`] - per-tenant, per-operation fixed-window quotas
//! - [`scope`] - runs work on a pooled connection bound to one tenant
//! - [`audit`] - append-only, tenant-scoped audit trail
//!
//! Supporting modules:
//!
//! - [`tenant`] - identity types and the request context
//! - [`isolation`] - the isolation variable contract and policy DDL
//! - [`backend`] / [`backends`] - pooled storage engines
//! - [`directory`] - tenant and role lookup sources
//! - [`error`] - error types for all operations
//!
//! # Backend Features
//!
//! - `sqlite` (default) - SQLite with emulated row-level policies
//! - `postgres` - PostgreSQL with native row-level security
//! - `redis` - Redis counter store for the rate limiter
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tenantscope_core::backends::sqlite::SqliteBackend;
//! use tenantscope_core::isolation::{IsolationConfig, IsolationKey, TenantTableBuilder};
//! use tenantscope_core::scope::{ScopeConfig, ScopedContextManager};
//! use tenantscope_core::tenant::TenantId;
//! use tenantscope_core::TenancyError;
//!
//! # async fn example() -> Result<(), TenancyError> {
//! let key = IsolationKey::new(&IsolationConfig::default())?;
//! let backend = Arc::new(SqliteBackend::open("app.db")?);
//! backend.init_schema(&key).await?;
//! backend
//!     .install_table(&TenantTableBuilder::new("items", &key).column("name", "TEXT", false))
//!     .await?;
//!
//! let manager = ScopedContextManager::new(backend, key, ScopeConfig::default());
//! manager
//!     .with_tenant_scope(&TenantId::new("t-1"), |scope| {
//!         Box::pin(async move {
//!             // The tenant column is stamped from the isolation variable.
//!             scope
//!                 .client()
//!                 .execute("INSERT INTO items (id, name) VALUES ('1', 'polish')", [])?;
//!             Ok::<_, TenancyError>(())
//!         })
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod access;
pub mod audit;
pub mod backend;
pub mod backends;
pub mod directory;
pub mod error;
pub mod isolation;
pub mod rate_limit;
pub mod resolver;
pub mod scope;
pub mod tenant;

// Re-export commonly used types at crate root
pub use error::{
    AccessError, BackendError, RateLimitError, ScopeError, TenancyError, TenancyResult,
    TenantError, ValidationError,
};
pub use tenant::{PrincipalId, RequestContext, Role, Tenant, TenantId, TenantSlug};

pub use access::AccessValidator;
pub use audit::{AuditLogEntry, AuditRecorder, AuditTarget};
pub use backend::{BackendKind, IsolationBackend, PoolStatus};
pub use isolation::{IsolationConfig, IsolationKey};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use resolver::{TenantResolver, TenantSignals, TenantSource};
pub use scope::{ScopeConfig, ScopedContextManager, ScopedHandle};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
