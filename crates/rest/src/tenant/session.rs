//! The authenticated session attached to a request.

use axum::http::{HeaderMap, HeaderName};
use tenantscope_core::tenant::PrincipalId;

/// Header carrying the authenticated principal, set by a trusted gateway.
pub static X_AUTHENTICATED_PRINCIPAL: HeaderName =
    HeaderName::from_static("x-authenticated-principal");

/// Header carrying the tenant slug bound to the session.
pub static X_SESSION_TENANT: HeaderName = HeaderName::from_static("x-session-tenant");

/// The principal behind a request, as established by authentication.
///
/// Authentication itself happens outside this crate. Whatever performs it
/// inserts an `AuthenticatedSession` into the request extensions before the
/// tenant pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    /// The authenticated principal.
    pub principal_id: PrincipalId,
    /// The tenant slug the session was opened for, if any.
    pub tenant_slug: Option<String>,
}

impl AuthenticatedSession {
    /// Creates a session without a tenant binding.
    pub fn new(principal_id: impl Into<PrincipalId>) -> Self {
        Self {
            principal_id: principal_id.into(),
            tenant_slug: None,
        }
    }

    /// Binds the session to a tenant slug.
    pub fn with_tenant(mut self, slug: impl Into<String>) -> Self {
        self.tenant_slug = Some(slug.into());
        self
    }

    /// Reads a session from gateway headers.
    ///
    /// Returns `None` when no principal header is present or it is blank.
    pub fn from_gateway_headers(headers: &HeaderMap) -> Option<Self> {
        let principal = headers
            .get(&X_AUTHENTICATED_PRINCIPAL)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())?;

        let tenant_slug = headers
            .get(&X_SESSION_TENANT)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

        Some(Self {
            principal_id: PrincipalId::new(principal),
            tenant_slug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_from_gateway_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(&X_AUTHENTICATED_PRINCIPAL, HeaderValue::from_static("user-1"));
        headers.insert(&X_SESSION_TENANT, HeaderValue::from_static("acme-nails"));

        let session = AuthenticatedSession::from_gateway_headers(&headers).unwrap();
        assert_eq!(session.principal_id, PrincipalId::new("user-1"));
        assert_eq!(session.tenant_slug.as_deref(), Some("acme-nails"));
    }

    #[test]
    fn test_missing_principal_is_no_session() {
        let mut headers = HeaderMap::new();
        headers.insert(&X_SESSION_TENANT, HeaderValue::from_static("acme-nails"));
        assert!(AuthenticatedSession::from_gateway_headers(&headers).is_none());

        headers.insert(&X_AUTHENTICATED_PRINCIPAL, HeaderValue::from_static("  "));
        assert!(AuthenticatedSession::from_gateway_headers(&headers).is_none());
    }
}
