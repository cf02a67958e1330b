//! PostgreSQL isolation backend.
//!
//! Isolation uses native row-level security. The scope manager sets the
//! isolation variable with `set_config(name, value, false)`, which lasts for
//! the session, and clears it with `RESET`. Tables built with
//! [`TenantTableBuilder::to_postgres_ddl`] filter every statement on
//! `current_setting(name, true)`.
//!
//! PostgreSQL never applies row-level security to superusers or to roles with
//! `BYPASSRLS`. Connect as an ordinary role that does not own the tables, or
//! rely on the `FORCE ROW LEVEL SECURITY` the builder emits when it does.
//!
//! [`TenantTableBuilder::to_postgres_ddl`]: crate::isolation::TenantTableBuilder::to_postgres_ddl

mod backend;
mod registry;

pub use backend::{PostgresBackend, PostgresConfig, PostgresSslMode};
