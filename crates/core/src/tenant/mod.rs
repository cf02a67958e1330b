//! Tenant, principal and request identity types.
//!
//! # Core Types
//!
//! - [`Tenant`] - A registry record `{id, slug, status}`
//! - [`TenantId`] - Opaque identifier written to the isolation column
//! - [`TenantSlug`] - Validated human-readable key carried by requests
//! - [`RequestContext`] - Explicit per-request identity passed to every call site
//! - [`Role`] / [`Operation`] - Privilege hierarchy within a tenant

mod context;
mod id;
mod model;
mod role;

pub use context::{RequestContext, RequestContextBuilder};
pub use id::{MAX_SLUG_LENGTH, PrincipalId, TenantId, TenantSlug};
pub use model::{Tenant, TenantStatus};
pub use role::{Operation, Role};
