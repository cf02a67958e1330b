//! Server configuration for the tenantscope REST adapter.
//!
//! Every option can be given on the command line or through an environment
//! variable.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TENANTSCOPE_PORT` | 8080 | Server port |
//! | `TENANTSCOPE_HOST` | 127.0.0.1 | Host to bind |
//! | `TENANTSCOPE_LOG_LEVEL` | info | Log level |
//! | `TENANTSCOPE_REQUEST_TIMEOUT` | 30 | Request timeout (seconds) |
//! | `TENANTSCOPE_ENABLE_CORS` | true | Enable CORS |
//! | `TENANTSCOPE_CORS_ORIGINS` | * | Allowed origins |
//! | `TENANTSCOPE_DATABASE_URL` | (none) | SQLite path or `postgres://` URL |
//! | `TENANTSCOPE_MAX_CONNECTIONS` | 10 | Pool size |
//! | `TENANTSCOPE_POOL_TIMEOUT_MS` | 5000 | Pool borrow timeout |
//! | `TENANTSCOPE_WORK_TIMEOUT_MS` | 30000 | Scoped work timeout |
//! | `TENANTSCOPE_ISOLATION_VARIABLE` | app.current_tenant | Isolation variable |
//! | `TENANTSCOPE_TENANT_HEADER` | x-tenant | Trusted tenant header |
//! | `TENANTSCOPE_TRUST_GATEWAY_HEADERS` | false | Build sessions from gateway headers |
//! | `TENANTSCOPE_RATE_LIMITS` | (presets) | `class=limit/window` overrides |
//! | `TENANTSCOPE_RATE_LIMIT_STORE_TIMEOUT_MS` | 250 | Counter store deadline |
//! | `TENANTSCOPE_REDIS_URL` | (none) | Redis counter store |
//! | `TENANTSCOPE_TENANT_CACHE_TTL_MS` | 60000 | Tenant cache TTL, 0 disables |
//! | `TENANTSCOPE_SHUTDOWN_GRACE_SECS` | 30 | Scope drain on shutdown |
//!
//! # Example
//!
//! ```rust
//! use tenantscope_rest::ServerConfig;
//!
//! let config = ServerConfig {
//!     port: 3000,
//!     rate_limits: Some("read=500/1m,write=50/1m".to_string()),
//!     ..Default::default()
//! };
//! let limits = config.rate_limit_config().unwrap();
//! assert_eq!(limits.rules["read"].limit, 500);
//! ```

use clap::Parser;
use tenantscope_core::ValidationError;
use tenantscope_core::directory::CacheConfig;
use tenantscope_core::isolation::IsolationConfig;
use tenantscope_core::rate_limit::{RateLimitConfig, RateLimitRule};
use tenantscope_core::scope::ScopeConfig;

/// Server configuration for the tenantscope REST adapter.
#[derive(Debug, Clone, Parser)]
#[command(name = "tenantscope")]
#[command(about = "Tenant isolation server")]
pub struct ServerConfig {
    /// Port to listen on.
    #[arg(short, long, env = "TENANTSCOPE_PORT", default_value = "8080")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "TENANTSCOPE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "TENANTSCOPE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Request timeout in seconds.
    #[arg(long, env = "TENANTSCOPE_REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,

    /// Enable CORS.
    #[arg(long, env = "TENANTSCOPE_ENABLE_CORS", default_value = "true")]
    pub enable_cors: bool,

    /// Allowed CORS origins (comma-separated, or * for all).
    #[arg(long, env = "TENANTSCOPE_CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    /// Allowed CORS methods (comma-separated, or * for all).
    #[arg(
        long,
        env = "TENANTSCOPE_CORS_METHODS",
        default_value = "GET,POST,PUT,PATCH,DELETE,OPTIONS"
    )]
    pub cors_methods: String,

    /// Allowed CORS headers (comma-separated, or * for all).
    #[arg(
        long,
        env = "TENANTSCOPE_CORS_HEADERS",
        default_value = "Content-Type,Authorization,Accept,X-Tenant,X-Request-Id"
    )]
    pub cors_headers: String,

    /// Database location: a SQLite file path or a `postgres://` URL.
    #[arg(long, env = "TENANTSCOPE_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Maximum number of pooled connections.
    #[arg(long, env = "TENANTSCOPE_MAX_CONNECTIONS", default_value = "10")]
    pub max_connections: u32,

    /// How long a scope waits for a pooled connection, in milliseconds.
    #[arg(long, env = "TENANTSCOPE_POOL_TIMEOUT_MS", default_value = "5000")]
    pub pool_timeout_ms: u64,

    /// How long scoped work may run, in milliseconds.
    #[arg(long, env = "TENANTSCOPE_WORK_TIMEOUT_MS", default_value = "30000")]
    pub work_timeout_ms: u64,

    /// Name of the connection-scoped isolation variable.
    #[arg(
        long,
        env = "TENANTSCOPE_ISOLATION_VARIABLE",
        default_value = "app.current_tenant"
    )]
    pub isolation_variable: String,

    /// Header carrying the tenant slug, set by a trusted gateway.
    #[arg(long, env = "TENANTSCOPE_TENANT_HEADER", default_value = "x-tenant")]
    pub tenant_header: String,

    /// Build the authenticated session from `x-authenticated-principal` and
    /// `x-session-tenant`. Enable only behind a gateway that sets them.
    #[arg(long, env = "TENANTSCOPE_TRUST_GATEWAY_HEADERS", default_value = "false")]
    pub trust_gateway_headers: bool,

    /// Rate limit overrides as `class=limit/window` pairs, comma-separated.
    #[arg(long, env = "TENANTSCOPE_RATE_LIMITS")]
    pub rate_limits: Option<String>,

    /// Counter store deadline in milliseconds.
    #[arg(
        long,
        env = "TENANTSCOPE_RATE_LIMIT_STORE_TIMEOUT_MS",
        default_value = "250"
    )]
    pub rate_limit_store_timeout_ms: u64,

    /// Redis URL for the shared counter store. In-memory counters when unset.
    #[arg(long, env = "TENANTSCOPE_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Tenant cache TTL in milliseconds. Zero disables the cache.
    #[arg(long, env = "TENANTSCOPE_TENANT_CACHE_TTL_MS", default_value = "60000")]
    pub tenant_cache_ttl_ms: u64,

    /// How long shutdown waits for open scopes, in seconds.
    #[arg(long, env = "TENANTSCOPE_SHUTDOWN_GRACE_SECS", default_value = "30")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            log_level: "info".to_string(),
            request_timeout: 30,
            enable_cors: true,
            cors_origins: "*".to_string(),
            cors_methods: "GET,POST,PUT,PATCH,DELETE,OPTIONS".to_string(),
            cors_headers: "Content-Type,Authorization,Accept,X-Tenant,X-Request-Id".to_string(),
            database_url: None,
            max_connections: 10,
            pool_timeout_ms: 5000,
            work_timeout_ms: 30000,
            isolation_variable: "app.current_tenant".to_string(),
            tenant_header: "x-tenant".to_string(),
            trust_gateway_headers: false,
            rate_limits: None,
            rate_limit_store_timeout_ms: 250,
            redis_url: None,
            tenant_cache_ttl_ms: 60000,
            shutdown_grace_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Creates a new ServerConfig from environment variables.
    pub fn from_env() -> Self {
        Self::try_parse().unwrap_or_default()
    }

    /// Returns the socket address to bind to.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("Port cannot be 0".to_string());
        }

        if self.request_timeout == 0 {
            errors.push("Request timeout cannot be 0".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections cannot be 0".to_string());
        }

        if let Err(e) = self.scope_config().validate() {
            errors.push(e.to_string());
        }

        if let Err(e) = tenantscope_core::IsolationKey::new(&self.isolation_config()) {
            errors.push(e.to_string());
        }

        if http::HeaderName::from_bytes(self.tenant_header.as_bytes()).is_err() {
            errors.push(format!("Invalid tenant header name '{}'", self.tenant_header));
        }

        match self.rate_limit_config() {
            Ok(limits) => {
                if let Err(e) = limits.validate() {
                    errors.push(e.to_string());
                }
            }
            Err(e) => errors.push(e.to_string()),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Returns the scope manager configuration.
    pub fn scope_config(&self) -> ScopeConfig {
        ScopeConfig {
            pool_timeout_ms: self.pool_timeout_ms,
            work_timeout_ms: self.work_timeout_ms,
            ..Default::default()
        }
    }

    /// Returns the isolation variable configuration.
    pub fn isolation_config(&self) -> IsolationConfig {
        IsolationConfig {
            variable: self.isolation_variable.clone(),
            ..Default::default()
        }
    }

    /// Returns the tenant cache configuration.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            enabled: self.tenant_cache_ttl_ms > 0,
            ttl_ms: self.tenant_cache_ttl_ms,
            ..Default::default()
        }
    }

    /// Builds the rate limit configuration.
    ///
    /// Starts from the built-in presets and applies each `class=limit/window`
    /// override, e.g. `auth=10/5m,upload=3/30s`.
    pub fn rate_limit_config(&self) -> Result<RateLimitConfig, ValidationError> {
        let mut limits = RateLimitConfig {
            store_timeout_ms: self.rate_limit_store_timeout_ms,
            ..Default::default()
        };

        let Some(overrides) = self.rate_limits.as_deref() else {
            return Ok(limits);
        };

        for entry in overrides.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (class, rule) =
                entry
                    .split_once('=')
                    .ok_or_else(|| ValidationError::InvalidConfig {
                        message: format!("rate limit '{entry}' is not of the form class=limit/window"),
                    })?;
            let rule: RateLimitRule = rule.parse()?;
            limits = limits.with_rule(class.trim(), rule);
        }

        Ok(limits)
    }

    /// Creates a configuration suitable for testing.
    ///
    /// Gateway headers are trusted so tests can authenticate with plain
    /// request headers.
    pub fn for_testing() -> Self {
        Self {
            port: 0,
            log_level: "debug".to_string(),
            request_timeout: 5,
            enable_cors: false,
            cors_methods: "*".to_string(),
            cors_headers: "*".to_string(),
            pool_timeout_ms: 1000,
            work_timeout_ms: 2000,
            trust_gateway_headers: true,
            tenant_cache_ttl_ms: 0,
            shutdown_grace_secs: 1,
            ..Default::default()
        }
    }
}
