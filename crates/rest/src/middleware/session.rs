//! Session construction from trusted gateway headers.

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::debug;

use crate::tenant::AuthenticatedSession;

/// Middleware that turns gateway identity headers into an
/// [`AuthenticatedSession`].
///
/// Install it only when a gateway in front of the server sets
/// `x-authenticated-principal` and strips it from client requests. The
/// server enables it with `trust_gateway_headers`.
pub async fn trusted_session_layer(mut request: Request, next: Next) -> Response {
    if request.extensions().get::<AuthenticatedSession>().is_none() {
        if let Some(session) = AuthenticatedSession::from_gateway_headers(request.headers()) {
            debug!(principal_id = %session.principal_id, "session from gateway headers");
            request.extensions_mut().insert(session);
        }
    }
    next.run(request).await
}
