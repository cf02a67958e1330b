//! Extraction of tenant signals from a request.

use axum::extract::Request;
use axum::http::HeaderName;
use tenantscope_core::resolver::TenantSignals;

use super::session::AuthenticatedSession;

/// Path prefix under which the first segment names the tenant.
pub const TENANT_PATH_PREFIX: &str = "/t/";

/// Returns the tenant slug of a `/t/{slug}/...` path.
pub fn slug_from_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(TENANT_PATH_PREFIX)?;
    rest.split('/').next().filter(|slug| !slug.is_empty())
}

/// Collects every tenant signal the request carries.
///
/// Header values that are not valid UTF-8 are kept in lossy form so they
/// fail resolution instead of silently disappearing.
pub fn extract_signals(request: &Request, tenant_header: &HeaderName) -> TenantSignals {
    let mut signals = TenantSignals::new();

    if let Some(value) = request.headers().get(tenant_header) {
        signals = signals.with_header(String::from_utf8_lossy(value.as_bytes()));
    }

    if let Some(slug) = slug_from_path(request.uri().path()) {
        signals = signals.with_path(slug);
    }

    if let Some(slug) = request
        .extensions()
        .get::<AuthenticatedSession>()
        .and_then(|s| s.tenant_slug.as_deref())
    {
        signals = signals.with_session(slug);
    }

    signals
}
