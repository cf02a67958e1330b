//! Isolation variable contract and policy DDL.

mod key;
mod policy;

pub use key::{IsolationConfig, IsolationKey, is_safe_identifier};
pub use policy::TenantTableBuilder;
