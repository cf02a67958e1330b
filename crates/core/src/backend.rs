//! Backend abstraction for isolation-capable connection pools.
//!
//! This module defines the [`IsolationBackend`] trait. A backend owns a
//! connection pool and knows how to apply, clear and read the isolation
//! variable on one of its connections. The scope manager drives the protocol;
//! backends only provide the engine-specific statements.

use std::fmt::Debug;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use crate::audit::AuditLogEntry;
use crate::error::BackendError;
use crate::isolation::IsolationKey;

/// Identifies the type of database backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// SQLite database with emulated row-level policies.
    Sqlite,
    /// PostgreSQL database with native row-level security.
    Postgres,
    /// Custom or unknown backend.
    Custom(&'static str),
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Connections currently open (idle and in use).
    pub size: u32,
    /// Connections idle in the pool.
    pub idle: u32,
    /// Maximum pool size.
    pub max_size: u32,
}

/// A pooled storage backend that can scope connections to a tenant.
///
/// Implementations must uphold one rule: a connection passed to
/// [`release`](Self::release) goes back to the pool, a connection passed to
/// [`discard`](Self::discard) is closed and never handed out again. The scope
/// manager decides which of the two a connection receives.
#[async_trait]
pub trait IsolationBackend: Send + Sync + Debug + 'static {
    /// A connection checked out of the pool.
    type Connection: Send;

    /// The driver client scoped work operates on.
    type Client: Send;

    /// Returns the kind of backend.
    fn kind(&self) -> BackendKind;

    /// Returns a human-readable name for this backend.
    fn name(&self) -> &'static str;

    /// Borrows a connection from the pool.
    async fn acquire(&self) -> Result<Self::Connection, BackendError>;

    /// Exposes the driver client of a checked-out connection.
    fn client(conn: &mut Self::Connection) -> &mut Self::Client;

    /// Sets the isolation variable on `conn` to `value`.
    ///
    /// The setting must be visible only to this connection and must persist
    /// across statements until cleared.
    async fn apply_isolation(
        &self,
        conn: &mut Self::Connection,
        key: &IsolationKey,
        value: &str,
    ) -> Result<(), BackendError>;

    /// Clears the isolation variable on `conn`.
    async fn clear_isolation(
        &self,
        conn: &mut Self::Connection,
        key: &IsolationKey,
    ) -> Result<(), BackendError>;

    /// Reads the isolation variable on `conn`. Empty values read as `None`.
    async fn current_isolation(
        &self,
        conn: &mut Self::Connection,
        key: &IsolationKey,
    ) -> Result<Option<String>, BackendError>;

    /// Appends an audit row through `conn`, which is already scoped.
    async fn append_audit(
        &self,
        conn: &mut Self::Connection,
        entry: &AuditLogEntry,
    ) -> Result<(), BackendError>;

    /// Bounds every statement issued through `conn` by `deadline`, or lifts
    /// the bound when `deadline` is `None`.
    ///
    /// Drivers that execute statements synchronously on the polling thread
    /// must abort a statement still running at the deadline, because the
    /// scope's timer cannot fire until control returns to the runtime. The
    /// default does nothing, which suits drivers whose statements are awaited.
    fn set_statement_deadline(&self, _conn: &mut Self::Connection, _deadline: Option<Instant>) {}

    /// Returns a clean connection to the pool.
    fn release(&self, conn: Self::Connection);

    /// Closes a connection whose state cannot be trusted.
    fn discard(&self, conn: Self::Connection);

    /// Checks if the backend is healthy and accepting connections.
    async fn health_check(&self) -> Result<(), BackendError>;

    /// Returns the current pool occupancy.
    fn pool_status(&self) -> PoolStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::Sqlite.to_string(), "sqlite");
        assert_eq!(BackendKind::Postgres.to_string(), "postgres");
        assert_eq!(BackendKind::Custom("custom-db").to_string(), "custom-db");
    }
}
