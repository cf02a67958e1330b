//! HTTP middleware for the tenantscope REST adapter.
//!
//! - [`tenant`] - The tenant pipeline: resolve, authorize, rate limit
//! - [`session`] - Session construction from trusted gateway headers
//! - [`rate_limit_headers`] - `X-RateLimit-*` response headers

pub mod rate_limit_headers;
pub mod session;
pub mod tenant;

pub use session::trusted_session_layer;
pub use tenant::{X_REQUEST_ID, operation_class, tenant_pipeline};
