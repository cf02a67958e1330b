//! Health check endpoint handlers.
//!
//! These routes sit outside the tenant pipeline so load balancers can reach
//! them without tenant or session headers.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tenantscope_core::IsolationBackend;
use tracing::{debug, warn};

use crate::error::{RestError, RestResult};
use crate::state::AppState;

/// Handler for the health check endpoint.
///
/// # HTTP Request
///
/// `GET [base]/health`
///
/// # Response
///
/// - `200 OK` - The pool answers and the manager accepts scopes
/// - `503 Service Unavailable` - The backend is unreachable or the server is draining
///
/// A failing counter store does not fail the check; the limiter fails open
/// and the response reports the store as `degraded`.
pub async fn health_handler<B>(State(state): State<AppState<B>>) -> RestResult<Response>
where
    B: IsolationBackend,
{
    debug!("Processing health check request");
    let manager = state.manager();

    if manager.is_shutting_down() {
        return Err(RestError::ServiceUnavailable {
            message: "server is shutting down".to_string(),
        });
    }

    let pool = manager.health_check().await.map_err(|e| {
        warn!(error = %e, "backend health check failed");
        RestError::ServiceUnavailable {
            message: e.to_string(),
        }
    })?;

    let store = match state.limiter().health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            warn!(error = %e, "counter store health check failed");
            "degraded"
        }
    };

    let body = json!({
        "status": "healthy",
        "backend": manager.backend().name(),
        "pool": {
            "size": pool.size,
            "idle": pool.idle,
            "maxSize": pool.max_size,
        },
        "activeScopes": manager.active_scopes(),
        "rateLimitStore": store,
        "auditFailures": state.audit().failures(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok((StatusCode::OK, Json(body)).into_response())
}

/// Handler for a liveness probe.
///
/// # HTTP Request
///
/// `GET [base]/_liveness`
pub async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}
