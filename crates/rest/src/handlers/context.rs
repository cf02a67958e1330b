//! Request context endpoint.

use axum::{Json, extract::State};
use serde::Serialize;
use tenantscope_core::{IsolationBackend, TenancyError};

use crate::error::RestResult;
use crate::extractors::TenantRequest;
use crate::state::AppState;

/// Body of the context response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextResponse {
    /// The resolved tenant.
    pub tenant_id: String,
    /// The tenant's slug.
    pub slug: String,
    /// The authorized principal.
    pub principal_id: String,
    /// The principal's role in the tenant.
    pub role: String,
    /// Request correlation ID.
    pub request_id: String,
    /// The isolation variable as read back inside the scope.
    pub isolation_value: Option<String>,
}

/// Returns the admitted request context and the isolation value a scope
/// for that tenant observes.
///
/// # HTTP Request
///
/// `GET [base]/context` or `GET [base]/t/{slug}/context`
pub async fn context_handler<B>(
    State(state): State<AppState<B>>,
    TenantRequest(ctx): TenantRequest,
) -> RestResult<Json<ContextResponse>>
where
    B: IsolationBackend,
{
    let isolation_value = state
        .manager()
        .with_request_scope(&ctx, |scope| {
            Box::pin(async move { Ok::<_, TenancyError>(scope.isolation_value().await?) })
        })
        .await?;

    Ok(Json(ContextResponse {
        tenant_id: ctx.tenant_id().to_string(),
        slug: ctx.slug().to_string(),
        principal_id: ctx.principal_id().to_string(),
        role: ctx.role().to_string(),
        request_id: ctx.request_id().to_string(),
        isolation_value,
    }))
}
