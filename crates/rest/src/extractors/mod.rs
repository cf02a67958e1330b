//! Axum extractors for tenant-scoped handlers.

pub mod tenant;

pub use tenant::TenantRequest;
