//! Route configuration.
//!
//! Defines all routes and which of them run behind the tenant pipeline.

use axum::{Router, middleware, routing::get};
use tenantscope_core::IsolationBackend;

use crate::handlers;
use crate::middleware::tenant_pipeline;
use crate::state::AppState;

/// Creates all routes.
///
/// # Routes
///
/// ## Unscoped
/// - `GET /health` - Health check with pool status
/// - `GET /_liveness` - Liveness probe
///
/// ## Tenant-scoped (behind the tenant pipeline)
/// - `GET /context` - Request context, tenant from header or session
/// - `GET /t/{slug}/context` - Request context, tenant from the path
pub fn create_routes<B>(state: AppState<B>) -> Router
where
    B: IsolationBackend,
{
    let tenant_routes = Router::new()
        .route("/context", get(handlers::context_handler::<B>))
        .route("/t/{slug}/context", get(handlers::context_handler::<B>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            tenant_pipeline::<B>,
        ));

    Router::new()
        .route("/health", get(handlers::health_handler::<B>))
        .route("/_liveness", get(handlers::liveness_handler))
        .merge(tenant_routes)
        .with_state(state)
}
