//! Application state for the REST adapter.
//!
//! The state bundles the isolation components every request passes through.
//! All of them are built once at startup and shared by reference.

use std::sync::Arc;

use axum::http::HeaderName;
use tenantscope_core::{
    AccessValidator, AuditRecorder, IsolationBackend, RateLimiter, ScopedContextManager,
    TenantResolver,
};

use crate::config::ServerConfig;

/// The isolation components a server is built from.
pub struct TenancyServices<B: IsolationBackend> {
    /// Scoped connection manager.
    pub manager: Arc<ScopedContextManager<B>>,
    /// Tenant resolver.
    pub resolver: Arc<TenantResolver>,
    /// Principal authorization.
    pub access: Arc<AccessValidator>,
    /// Per-tenant rate limiter.
    pub limiter: RateLimiter,
}

/// Shared application state for the REST adapter.
///
/// # Type Parameters
///
/// * `B` - The isolation backend type
pub struct AppState<B: IsolationBackend> {
    manager: Arc<ScopedContextManager<B>>,
    resolver: Arc<TenantResolver>,
    access: Arc<AccessValidator>,
    limiter: RateLimiter,
    audit: Arc<AuditRecorder<B>>,
    tenant_header: HeaderName,
    config: Arc<ServerConfig>,
}

// Manually implement Clone since B is wrapped in Arc and doesn't need to be Clone
impl<B: IsolationBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            resolver: Arc::clone(&self.resolver),
            access: Arc::clone(&self.access),
            limiter: self.limiter.clone(),
            audit: Arc::clone(&self.audit),
            tenant_header: self.tenant_header.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<B: IsolationBackend> AppState<B> {
    /// Creates the state from the isolation components and configuration.
    ///
    /// An invalid tenant header name falls back to `x-tenant`; the server
    /// rejects such a configuration in [`ServerConfig::validate`] first.
    pub fn new(services: TenancyServices<B>, config: ServerConfig) -> Self {
        let tenant_header = HeaderName::from_bytes(config.tenant_header.as_bytes())
            .unwrap_or_else(|_| HeaderName::from_static("x-tenant"));
        let audit = Arc::new(AuditRecorder::new(Arc::clone(&services.manager)));

        Self {
            manager: services.manager,
            resolver: services.resolver,
            access: services.access,
            limiter: services.limiter,
            audit,
            tenant_header,
            config: Arc::new(config),
        }
    }

    /// Returns the scope manager.
    pub fn manager(&self) -> &Arc<ScopedContextManager<B>> {
        &self.manager
    }

    /// Returns the tenant resolver.
    pub fn resolver(&self) -> &TenantResolver {
        &self.resolver
    }

    /// Returns the access validator.
    pub fn access(&self) -> &AccessValidator {
        &self.access
    }

    /// Returns the rate limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Returns the audit recorder.
    pub fn audit(&self) -> &AuditRecorder<B> {
        &self.audit
    }

    /// Returns the header carrying the tenant slug.
    pub fn tenant_header(&self) -> &HeaderName {
        &self.tenant_header
    }

    /// Returns a reference to the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
