//! The tenant pipeline.
//!
//! Every tenant route runs behind [`tenant_pipeline`], which admits a request
//! in a fixed order:
//!
//! 1. collect tenant signals and resolve the tenant
//! 2. authorize the session principal for that tenant
//! 3. count the request against the tenant's quota
//! 4. insert the [`RequestContext`] for handlers
//!
//! A failure at any step ends the request before a handler runs.

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, Method, header::CONTENT_TYPE},
    middleware::Next,
    response::Response,
};
use tenantscope_core::{IsolationBackend, RequestContext};
use tracing::{debug, info};

use super::rate_limit_headers::apply_rate_limit_headers;
use crate::error::RestError;
use crate::state::AppState;
use crate::tenant::{AuthenticatedSession, extract_signals};

/// Header used to propagate a request ID from upstream.
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Returns the rate limit class of a request.
///
/// Multipart bodies count as `upload`, safe methods as `read`, and
/// everything else as `write`.
pub fn operation_class(method: &Method, headers: &HeaderMap) -> &'static str {
    let multipart = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/"));

    if multipart {
        "upload"
    } else if method.is_safe() {
        "read"
    } else {
        "write"
    }
}

/// Middleware that admits a request for exactly one tenant.
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn tenant_pipeline<B: IsolationBackend>(
    State(state): State<AppState<B>>,
    mut request: Request,
    next: Next,
) -> Result<Response, RestError> {
    let started = Instant::now();

    let signals = extract_signals(&request, state.tenant_header());
    let resolved = state.resolver().resolve(&signals).await?;
    let source = resolved.source;

    let principal_id = request
        .extensions()
        .get::<AuthenticatedSession>()
        .map(|session| session.principal_id.clone());
    let mut ctx: RequestContext = state
        .access()
        .authorize_request(principal_id, resolved.tenant)
        .await?;

    if let Some(request_id) = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        ctx = ctx.with_request_id(request_id);
    }

    let class = operation_class(request.method(), request.headers());
    let decision = state.limiter().enforce(ctx.tenant_id(), class).await?;

    let tenant_id = ctx.tenant_id().clone();
    let request_id = ctx.request_id().to_string();
    debug!(
        tenant_id = %tenant_id,
        source = %source,
        role = %ctx.role(),
        class,
        remaining = decision.remaining,
        degraded = decision.degraded,
        "request admitted"
    );
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);

    info!(
        tenant_id = %tenant_id,
        request_id = %request_id,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );
    Ok(response)
}
