//! Request context extractor.
//!
//! Hands the [`RequestContext`] built by the tenant pipeline to a handler.

use axum::{extract::FromRequestParts, http::request::Parts};
use tenantscope_core::RequestContext;

use crate::error::RestError;

/// Axum extractor for the admitted request context.
///
/// Only usable on routes behind
/// [`tenant_pipeline`](crate::middleware::tenant_pipeline). A handler that
/// extracts it on any other route fails with a 500, never with a default
/// tenant.
///
/// # Example
///
/// ```rust,ignore
/// use tenantscope_rest::extractors::TenantRequest;
///
/// async fn handler(TenantRequest(ctx): TenantRequest) {
///     println!("Tenant ID: {}", ctx.tenant_id());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TenantRequest(pub RequestContext);

impl TenantRequest {
    /// Returns a reference to the request context.
    pub fn context(&self) -> &RequestContext {
        &self.0
    }

    /// Consumes the extractor and returns the request context.
    pub fn into_context(self) -> RequestContext {
        self.0
    }
}

impl<S> FromRequestParts<S> for TenantRequest
where
    S: Send + Sync,
{
    type Rejection = RestError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .map(TenantRequest)
            .ok_or_else(|| RestError::InternalError {
                message: "request context missing; route is not behind the tenant pipeline"
                    .to_string(),
            })
    }
}
