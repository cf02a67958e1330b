//! Tenant signals carried by an HTTP request.
//!
//! A request can name its tenant in three places:
//!
//! - **Header**: the trusted tenant header (default `x-tenant`), set by a
//!   gateway in front of the server
//! - **Path**: a `/t/{slug}/...` prefix
//! - **Session**: the tenant recorded in the [`AuthenticatedSession`]
//!
//! All three are collected into a [`TenantSignals`] and handed to the core
//! resolver, which requires them to agree.
//!
//! [`TenantSignals`]: tenantscope_core::resolver::TenantSignals

mod session;
mod signals;

pub use session::{AuthenticatedSession, X_AUTHENTICATED_PRINCIPAL, X_SESSION_TENANT};
pub use signals::{TENANT_PATH_PREFIX, extract_signals, slug_from_path};
