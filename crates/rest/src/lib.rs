//! # tenantscope-rest - axum adapter for the tenant isolation core
//!
//! This crate puts the isolation components of `tenantscope-core` in front of
//! an axum router. Every tenant route runs behind a middleware pipeline that
//! resolves the tenant, authorizes the principal and enforces the tenant's
//! rate limit before a handler sees the request.
//!
//! ## Backend Support
//!
//! Storage backends are configured through feature flags:
//!
//! - `sqlite` - SQLite backend (default, great for development)
//! - `postgres` - PostgreSQL backend with native row-level security
//! - `redis` - Redis counter store for rate limiting across instances
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tenantscope_core::backends::sqlite::SqliteBackend;
//! use tenantscope_rest::{ServerConfig, TenancyServices, create_app_with_config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::default();
//!     let backend = Arc::new(SqliteBackend::open("tenants.db")?);
//!     let services: TenancyServices<SqliteBackend> = build_services(backend, &config)?;
//!
//!     let app = create_app_with_config(services, config.clone());
//!     let listener = tokio::net::TcpListener::bind(config.socket_addr()).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## API Endpoints
//!
//! | Route | Tenant pipeline | Description |
//! |-------|-----------------|-------------|
//! | `GET /health` | no | Pool status, open scopes, counter store state |
//! | `GET /_liveness` | no | Liveness probe |
//! | `GET /context` | yes | Request context; tenant from header or session |
//! | `GET /t/{slug}/context` | yes | Request context; tenant from the path |
//!
//! ## HTTP Headers
//!
//! - `X-Tenant` - Tenant slug set by a trusted gateway (name configurable)
//! - `X-Authenticated-Principal` / `X-Session-Tenant` - Session from a trusted
//!   gateway, honoured only with `trust_gateway_headers`
//! - `X-Request-Id` - Propagated into the request context
//! - `X-RateLimit-Limit` / `X-RateLimit-Remaining` / `X-RateLimit-Reset` -
//!   Quota state on every admitted response
//! - `Retry-After` - Seconds until the window resets, on 429 responses
//!
//! ## Architecture
//!
//! - [`error`] - Error types and HTTP status mapping
//! - [`config`] - Server configuration
//! - [`state`] - Application state (isolation components, configuration)
//! - [`tenant`] - Tenant signal extraction and the authenticated session
//! - [`middleware`] - The tenant pipeline and gateway session layer
//! - [`extractors`] - Axum extractors for the request context
//! - [`handlers`] - HTTP request handlers
//! - [`routing`] - Route configuration

// Enforce documentation
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routing;
pub mod state;
pub mod tenant;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{RestError, RestResult};
pub use state::{AppState, TenancyServices};

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method},
};
use tenantscope_core::IsolationBackend;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

/// Creates the Axum application with custom configuration.
///
/// This function sets up all routes, the tenant pipeline, and the
/// configured middleware stack.
///
/// # Arguments
///
/// * `services` - The isolation components requests pass through
/// * `config` - Server configuration
pub fn create_app_with_config<B>(services: TenancyServices<B>, config: ServerConfig) -> Router
where
    B: IsolationBackend,
{
    info!(
        backend = services.manager.backend().name(),
        trust_gateway_headers = config.trust_gateway_headers,
        "Creating REST API server"
    );

    let state = AppState::new(services, config.clone());
    let router = routing::create_routes(state);

    // Runs before the tenant pipeline so the session is in place
    let router = if config.trust_gateway_headers {
        router.layer(axum::middleware::from_fn(middleware::trusted_session_layer))
    } else {
        router
    };

    // Build middleware stack
    let service_builder = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            std::time::Duration::from_secs(config.request_timeout),
        ));

    // Add CORS if enabled
    let router = if config.enable_cors {
        let cors = build_cors_layer(&config);
        router.layer(cors)
    } else {
        router
    };

    // Apply remaining middleware
    router.layer(service_builder)
}

/// Builds the CORS layer from the comma-separated lists in `config`.
///
/// `*` allows anything; entries that fail to parse are skipped.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    fn parsed<T: std::str::FromStr>(list: &str) -> Vec<T> {
        list.split(',').filter_map(|s| s.trim().parse().ok()).collect()
    }

    let cors = match config.cors_origins.as_str() {
        "*" => CorsLayer::new().allow_origin(Any),
        origins => CorsLayer::new().allow_origin(parsed::<HeaderValue>(origins)),
    };
    let cors = match config.cors_methods.as_str() {
        "*" => cors.allow_methods(Any),
        methods => cors.allow_methods(parsed::<Method>(methods)),
    };
    match config.cors_headers.as_str() {
        "*" => cors.allow_headers(Any),
        headers => cors.allow_headers(parsed::<HeaderName>(headers)),
    }
}

/// Initializes the tracing subscriber for logging.
///
/// This should be called once at application startup. `RUST_LOG` overrides
/// the default directives.
///
/// # Arguments
///
/// * `level` - The log level (error, warn, info, debug, trace)
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tenantscope_core={level},tenantscope_rest={level},tenantscope={level},tower_http=debug"
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
