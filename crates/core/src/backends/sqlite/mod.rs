//! SQLite isolation backend.
//!
//! Row-level isolation is emulated: each tenant-scoped table is stored as
//! `<name>__rows` and exposed through a view `<name>` that only returns rows
//! whose tenant column equals `current_setting('<variable>')`. `INSTEAD OF`
//! triggers stamp inserts with the current tenant and confine updates and
//! deletes to it. See [`TenantTableBuilder::to_sqlite_ddl`].
//!
//! # Example
//!
//! ```no_run
//! use tenantscope_core::backends::sqlite::SqliteBackend;
//! use tenantscope_core::isolation::{IsolationConfig, IsolationKey, TenantTableBuilder};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let key = IsolationKey::new(&IsolationConfig::default())?;
//! let backend = SqliteBackend::open("app.db")?;
//! backend.init_schema(&key).await?;
//! backend
//!     .install_table(&TenantTableBuilder::new("items", &key).column("name", "TEXT", false))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! Besides the tenant-scoped tables the backend keeps two registry tables that
//! are not tenant-scoped:
//!
//! ```sql
//! CREATE TABLE tenants (
//!     id TEXT PRIMARY KEY,
//!     slug TEXT NOT NULL UNIQUE,
//!     status TEXT NOT NULL,
//!     created_at TEXT NOT NULL
//! );
//!
//! CREATE TABLE tenant_roles (
//!     principal_id TEXT NOT NULL,
//!     tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
//!     role TEXT NOT NULL,
//!     PRIMARY KEY (principal_id, tenant_id)
//! );
//! ```
//!
//! [`TenantTableBuilder::to_sqlite_ddl`]: crate::isolation::TenantTableBuilder::to_sqlite_ddl

mod backend;
mod connection;
mod registry;

pub use backend::{SqliteBackend, SqliteBackendConfig};
pub use connection::{IsolatedConnection, IsolatedSqliteManager};
