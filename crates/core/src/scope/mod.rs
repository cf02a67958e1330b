//! Tenant scopes over pooled connections.
//!
//! [`ScopedContextManager::with_tenant_scope`] is the only way business code
//! reaches the database. It guarantees that the isolation variable is set
//! before the work's first statement and is cleared, or the connection
//! discarded, before the connection can be borrowed again.

mod config;
mod handle;
mod manager;

pub use config::ScopeConfig;
pub use handle::ScopedHandle;
pub use manager::{ScopeFuture, ScopedContextManager, active_scope_tenant};
