//! HTTP request handlers.
//!
//! - [`health`] - Liveness and health endpoints (no tenant required)
//! - [`context`] - The request context as seen inside a tenant scope

pub mod context;
pub mod health;

pub use context::context_handler;
pub use health::{health_handler, liveness_handler};
