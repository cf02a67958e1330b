//! SQLite backend implementation.

use std::fmt::Debug;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::connection::{IsolatedConnection, IsolatedSqliteManager};
use crate::audit::AuditLogEntry;
use crate::backend::{BackendKind, IsolationBackend, PoolStatus};
use crate::error::{BackendError, BackendResult};
use crate::isolation::{IsolationKey, TenantTableBuilder};

/// Virtual machine instructions between deadline checks on a scoped statement.
const DEADLINE_CHECK_OPS: i32 = 1_000;

/// SQLite backend with per-connection session settings.
pub struct SqliteBackend {
    pool: Pool<IsolatedSqliteManager>,
    config: SqliteBackendConfig,
    is_memory: bool,
}

impl Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
        }
    }
}

fn internal(message: impl Into<String>) -> BackendError {
    BackendError::Internal {
        backend_name: "sqlite".to_string(),
        message: message.into(),
        source: None,
    }
}

impl SqliteBackend {
    /// Creates a new in-memory SQLite backend.
    ///
    /// Every SQLite in-memory connection is its own database, so the pool is
    /// limited to a single connection.
    pub fn in_memory() -> BackendResult<Self> {
        let config = SqliteBackendConfig {
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        Self::build(SqliteConnectionManager::memory(), config, true)
    }

    /// Opens or creates a file-based SQLite database.
    pub fn open<P: AsRef<Path>>(path: P) -> BackendResult<Self> {
        Self::with_config(path, SqliteBackendConfig::default())
    }

    /// Creates a backend with custom configuration.
    pub fn with_config<P: AsRef<Path>>(path: P, config: SqliteBackendConfig) -> BackendResult<Self> {
        let is_memory = path.as_ref().to_string_lossy() == ":memory:";
        if is_memory {
            return Self::in_memory();
        }
        Self::build(SqliteConnectionManager::file(path.as_ref()), config, false)
    }

    fn build(
        inner: SqliteConnectionManager,
        config: SqliteBackendConfig,
        is_memory: bool,
    ) -> BackendResult<Self> {
        let manager = IsolatedSqliteManager::new(
            inner,
            Duration::from_millis(u64::from(config.busy_timeout_ms)),
            config.enable_wal && !is_memory,
        );

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(config.min_connections.min(config.max_connections)))
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| BackendError::ConnectionFailed {
                backend_name: "sqlite".to_string(),
                message: e.to_string(),
            })?;

        info!(
            max_connections = config.max_connections,
            is_memory, "SQLite backend initialized"
        );

        Ok(Self {
            pool,
            config,
            is_memory,
        })
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &SqliteBackendConfig {
        &self.config
    }

    /// Runs `f` on a pooled connection on the blocking thread pool.
    ///
    /// The connection is not tenant-scoped; use it only for registry tables
    /// and schema changes.
    pub(super) async fn run_blocking<T, F>(&self, f: F) -> BackendResult<T>
    where
        F: FnOnce(&mut IsolatedConnection) -> BackendResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| internal(format!("blocking task failed: {e}")))?
    }

    /// Creates the registry tables and the audit table.
    pub async fn init_schema(&self, key: &IsolationKey) -> BackendResult<()> {
        let audit_ddl = crate::audit::audit_table(key, BackendKind::Sqlite)
            .to_sqlite_ddl()
            .map_err(|e| BackendError::MigrationError {
                message: e.to_string(),
            })?;

        self.run_blocking(move |conn| {
            conn.execute_batch(super::registry::REGISTRY_DDL)?;
            conn.execute_batch(&audit_ddl)?;
            Ok(())
        })
        .await?;

        debug!("SQLite schema initialized");
        Ok(())
    }

    /// Creates a tenant-scoped table with its emulated policy.
    pub async fn install_table(&self, table: &TenantTableBuilder) -> BackendResult<()> {
        let ddl = table.to_sqlite_ddl().map_err(|e| BackendError::MigrationError {
            message: e.to_string(),
        })?;
        self.run_blocking(move |conn| {
            conn.execute_batch(&ddl)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl IsolationBackend for SqliteBackend {
    type Connection = PooledConnection<IsolatedSqliteManager>;
    type Client = rusqlite::Connection;

    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn acquire(&self) -> Result<Self::Connection, BackendError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.get())
            .await
            .map_err(|e| internal(format!("blocking task failed: {e}")))?
            .map_err(BackendError::from)
    }

    fn client(conn: &mut Self::Connection) -> &mut Self::Client {
        &mut ***conn
    }

    async fn apply_isolation(
        &self,
        conn: &mut Self::Connection,
        key: &IsolationKey,
        value: &str,
    ) -> Result<(), BackendError> {
        conn.query_row(
            "SELECT set_config(?1, ?2, 0)",
            params![key.variable(), value],
            |_| Ok(()),
        )?;
        Ok(())
    }

    async fn clear_isolation(
        &self,
        conn: &mut Self::Connection,
        key: &IsolationKey,
    ) -> Result<(), BackendError> {
        conn.query_row(
            "SELECT set_config(?1, NULL, 0)",
            params![key.variable()],
            |_| Ok(()),
        )?;
        Ok(())
    }

    async fn current_isolation(
        &self,
        conn: &mut Self::Connection,
        key: &IsolationKey,
    ) -> Result<Option<String>, BackendError> {
        let value: Option<String> = conn.query_row(
            "SELECT current_setting(?1, 1)",
            params![key.variable()],
            |row| row.get(0),
        )?;
        Ok(value.filter(|v| !v.is_empty()))
    }

    async fn append_audit(
        &self,
        conn: &mut Self::Connection,
        entry: &AuditLogEntry,
    ) -> Result<(), BackendError> {
        let sql = format!(
            "INSERT INTO {} (id, actor_id, action, target_table, target_id, payload, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            crate::audit::AUDIT_TABLE,
        );
        conn.execute(
            &sql,
            params![
                entry.id.to_string(),
                entry.actor_id.as_str(),
                entry.action,
                entry.target_table,
                entry.target_id,
                serde_json::to_string(&entry.payload)?,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn set_statement_deadline(&self, conn: &mut Self::Connection, deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => conn.progress_handler(
                DEADLINE_CHECK_OPS,
                Some(move || Instant::now() >= deadline),
            ),
            None => conn.progress_handler(DEADLINE_CHECK_OPS, None::<fn() -> bool>),
        }
    }

    fn release(&self, conn: Self::Connection) {
        drop(conn);
    }

    fn discard(&self, mut conn: Self::Connection) {
        conn.mark_broken();
        drop(conn);
        debug!("SQLite connection discarded");
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        self.run_blocking(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
        .map_err(|e| BackendError::Unavailable {
            backend_name: "sqlite".to_string(),
            message: e.to_string(),
        })
    }

    fn pool_status(&self) -> PoolStatus {
        let state = self.pool.state();
        PoolStatus {
            size: state.connections,
            idle: state.idle_connections,
            max_size: self.pool.max_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{RoleDirectory, TenantDirectory, TenantEvent};
    use crate::isolation::IsolationConfig;
    use crate::tenant::{PrincipalId, Role, Tenant, TenantId, TenantSlug, TenantStatus};

    fn key() -> IsolationKey {
        IsolationKey::new(&IsolationConfig::default()).unwrap()
    }

    #[test]
    fn test_in_memory_backend() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.is_memory());
        assert_eq!(backend.name(), "sqlite");
        assert_eq!(backend.kind(), BackendKind::Sqlite);
        assert_eq!(backend.pool_status().max_size, 1);
    }

    #[tokio::test]
    async fn test_schema_initialization_is_idempotent() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema(&key()).await.unwrap();
        backend.init_schema(&key()).await.unwrap();
        assert!(backend.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_apply_and_clear_isolation() {
        let backend = SqliteBackend::in_memory().unwrap();
        let key = key();

        let mut conn = backend.acquire().await.unwrap();
        assert_eq!(backend.current_isolation(&mut conn, &key).await.unwrap(), None);

        backend.apply_isolation(&mut conn, &key, "t-1").await.unwrap();
        assert_eq!(
            backend.current_isolation(&mut conn, &key).await.unwrap(),
            Some("t-1".to_string())
        );

        backend.clear_isolation(&mut conn, &key).await.unwrap();
        assert_eq!(backend.current_isolation(&mut conn, &key).await.unwrap(), None);
        backend.release(conn);
    }

    #[tokio::test]
    async fn test_discarded_connection_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteBackendConfig {
            max_connections: 1,
            connection_timeout_ms: 2000,
            ..Default::default()
        };
        let backend = SqliteBackend::with_config(dir.path().join("db.sqlite"), config).unwrap();
        let key = key();

        let mut conn = backend.acquire().await.unwrap();
        backend.apply_isolation(&mut conn, &key, "t-1").await.unwrap();
        backend.discard(conn);

        let mut conn = backend.acquire().await.unwrap();
        assert_eq!(backend.current_isolation(&mut conn, &key).await.unwrap(), None);
        backend.release(conn);
    }

    #[tokio::test]
    async fn test_view_filters_by_current_tenant() {
        let backend = SqliteBackend::in_memory().unwrap();
        let key = key();
        backend
            .install_table(&TenantTableBuilder::new("items", &key).column("name", "TEXT", false))
            .await
            .unwrap();

        let mut conn = backend.acquire().await.unwrap();
        for (tenant, name) in [("t-1", "polish"), ("t-2", "lacquer")] {
            backend.apply_isolation(&mut conn, &key, tenant).await.unwrap();
            conn.execute(
                "INSERT INTO items (id, name) VALUES (?1, ?2)",
                params![format!("{tenant}-1"), name],
            )
            .unwrap();
        }

        backend.apply_isolation(&mut conn, &key, "t-1").await.unwrap();
        let names: Vec<String> = conn
            .prepare("SELECT name FROM items")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(names, vec!["polish".to_string()]);

        let forged = conn.execute(
            "INSERT INTO items (tenant_id, id, name) VALUES ('t-2', 'x', 'forged')",
            [],
        );
        assert!(forged.is_err());

        backend.clear_isolation(&mut conn, &key).await.unwrap();
        let visible: i64 = conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(visible, 0);
        assert!(conn.execute("INSERT INTO items (id, name) VALUES ('y', 'orphan')", []).is_err());
        backend.release(conn);
    }

    #[tokio::test]
    async fn test_registry_round_trip() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema(&key()).await.unwrap();

        let acme = Tenant::active("t-1", TenantSlug::parse("acme").unwrap());
        backend.register_tenant(&acme).await.unwrap();
        backend
            .grant_role(&PrincipalId::new("user-1"), &acme.id, Role::Manager)
            .await
            .unwrap();

        let found = backend.find_by_slug(&acme.slug).await.unwrap();
        assert_eq!(found, Some(acme.clone()));

        let role = backend
            .role_for(&PrincipalId::new("user-1"), &acme.id)
            .await
            .unwrap();
        assert_eq!(role, Some(Role::Manager));

        backend
            .grant_role(&PrincipalId::new("user-1"), &acme.id, Role::Admin)
            .await
            .unwrap();
        let role = backend
            .role_for(&PrincipalId::new("user-1"), &acme.id)
            .await
            .unwrap();
        assert_eq!(role, Some(Role::Admin));

        let event = backend
            .set_tenant_status(&acme.id, TenantStatus::Suspended)
            .await
            .unwrap();
        assert_eq!(event, Some(TenantEvent::Suspended(acme.id.clone())));
        let found = backend.find_by_slug(&acme.slug).await.unwrap().unwrap();
        assert_eq!(found.status, TenantStatus::Suspended);

        assert_eq!(
            backend
                .set_tenant_status(&TenantId::new("t-404"), TenantStatus::Active)
                .await
                .unwrap(),
            None
        );
        assert!(
            backend
                .revoke_role(&PrincipalId::new("user-1"), &acme.id)
                .await
                .unwrap()
        );
    }
}
