//! Tenantscope server
//!
//! Admits requests for exactly one tenant and scopes every pooled database
//! connection to that tenant while the request's work runs.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tenantscope_core::IsolationBackend;
use tenantscope_core::access::AccessValidator;
use tenantscope_core::directory::{RoleDirectory, TenantDirectory};
use tenantscope_core::isolation::IsolationKey;
use tenantscope_core::rate_limit::{CounterStore, InMemoryCounterStore, RateLimiter};
use tenantscope_core::resolver::TenantResolver;
use tenantscope_core::scope::ScopedContextManager;
use tenantscope_rest::{ServerConfig, TenancyServices, create_app_with_config, init_logging};
use tracing::{info, warn};

#[cfg(feature = "sqlite")]
use tenantscope_core::backends::sqlite::{SqliteBackend, SqliteBackendConfig};

/// Default SQLite database file when no URL is configured.
const DEFAULT_DATABASE: &str = "tenantscope.db";

fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

/// Creates and initializes a SQLite backend from the server configuration.
#[cfg(feature = "sqlite")]
async fn create_sqlite_backend(
    config: &ServerConfig,
    key: &IsolationKey,
) -> anyhow::Result<SqliteBackend> {
    let db_path = config.database_url.as_deref().unwrap_or(DEFAULT_DATABASE);
    info!(database = %db_path, "Initializing SQLite backend");

    let backend_config = SqliteBackendConfig {
        max_connections: config.max_connections,
        connection_timeout_ms: config.pool_timeout_ms,
        ..Default::default()
    };

    let backend = SqliteBackend::with_config(db_path, backend_config)?;
    if backend.is_memory() {
        warn!("In-memory SQLite database: pool limited to one connection");
    }
    backend.init_schema(key).await?;

    Ok(backend)
}

/// Builds the counter store for the rate limiter.
async fn create_counter_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    match config.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = tenantscope_core::rate_limit::RedisCounterStore::connect(url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => anyhow::bail!(
            "A Redis counter store requires the 'redis' feature. \
             Build with: cargo build -p tenantscope-server --features redis"
        ),
        None => {
            info!("Using in-memory rate limit counters");
            Ok(Arc::new(InMemoryCounterStore::new()))
        }
    }
}

/// Waits for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Wires the isolation components around `backend` and serves until shutdown.
async fn serve<B>(backend: Arc<B>, key: IsolationKey, config: ServerConfig) -> anyhow::Result<()>
where
    B: IsolationBackend + TenantDirectory + RoleDirectory,
{
    let limits = config.rate_limit_config()?;
    let store = create_counter_store(&config).await?;

    let manager = Arc::new(ScopedContextManager::new(
        backend.clone(),
        key,
        config.scope_config(),
    ));
    let services = TenancyServices {
        manager: Arc::clone(&manager),
        resolver: Arc::new(TenantResolver::new(backend.clone(), config.cache_config())),
        access: Arc::new(AccessValidator::new(backend)),
        limiter: RateLimiter::new(limits, store),
    };

    let app = create_app_with_config(services, config.clone());
    let addr = config.socket_addr();
    info!(address = %addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    if manager.shutdown(grace).await {
        info!("All tenant scopes released");
    } else {
        warn!(
            active_scopes = manager.active_scopes(),
            "Shutdown grace period elapsed with scopes still open"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    let key = IsolationKey::new(&config.isolation_config())?;
    let postgres = config.database_url.as_deref().is_some_and(is_postgres_url);

    info!(
        port = config.port,
        host = %config.host,
        isolation_variable = %key.variable(),
        backend = if postgres { "postgres" } else { "sqlite" },
        "Starting tenantscope server"
    );

    if postgres {
        start_postgres(config, key).await
    } else {
        start_sqlite(config, key).await
    }
}

/// Starts the server with the SQLite backend.
#[cfg(feature = "sqlite")]
async fn start_sqlite(config: ServerConfig, key: IsolationKey) -> anyhow::Result<()> {
    let backend = Arc::new(create_sqlite_backend(&config, &key).await?);
    serve(backend, key, config).await
}

/// Fallback when sqlite feature is not enabled.
#[cfg(not(feature = "sqlite"))]
async fn start_sqlite(_config: ServerConfig, _key: IsolationKey) -> anyhow::Result<()> {
    anyhow::bail!(
        "The sqlite backend requires the 'sqlite' feature. \
         Build with: cargo build -p tenantscope-server --features sqlite"
    )
}

/// Starts the server with the PostgreSQL backend.
#[cfg(feature = "postgres")]
async fn start_postgres(config: ServerConfig, key: IsolationKey) -> anyhow::Result<()> {
    use tenantscope_core::backends::postgres::{PostgresBackend, PostgresConfig};

    let url = config.database_url.as_deref().unwrap_or_default();
    let pg_config = PostgresConfig {
        max_connections: config.max_connections as usize,
        ..PostgresConfig::from_connection_string(url)?
    };
    info!(host = %pg_config.host, dbname = %pg_config.dbname, "Initializing PostgreSQL backend");

    let backend = PostgresBackend::new(pg_config).await?;
    backend.init_schema(&key).await?;

    serve(Arc::new(backend), key, config).await
}

/// Fallback when postgres feature is not enabled.
#[cfg(not(feature = "postgres"))]
async fn start_postgres(_config: ServerConfig, _key: IsolationKey) -> anyhow::Result<()> {
    anyhow::bail!(
        "The postgres backend requires the 'postgres' feature. \
         Build with: cargo build -p tenantscope-server --features postgres"
    )
}

#[cfg(not(any(feature = "sqlite", feature = "postgres")))]
compile_error!("At least one database backend feature must be enabled");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_postgres_url() {
        assert!(is_postgres_url("postgres://app@localhost/tenants"));
        assert!(is_postgres_url("postgresql://app@localhost/tenants"));
        assert!(!is_postgres_url("tenants.db"));
        assert!(!is_postgres_url(":memory:"));
    }
}
