//! Lookup sources for tenants and role mappings.
//!
//! The resolver and the access validator depend only on the traits here.
//! SQL backends implement both traits over their registry tables;
//! [`StaticTenantDirectory`] serves fixed deployments and tests.

mod cache;

use std::collections::HashMap;

use async_trait::async_trait;

pub use cache::{CacheConfig, TenantCache, TenantEvent};

use crate::error::BackendError;
use crate::tenant::{PrincipalId, Role, Tenant, TenantId, TenantSlug};

/// Looks tenants up by slug.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Returns the tenant registered under `slug`, whatever its status.
    async fn find_by_slug(&self, slug: &TenantSlug) -> Result<Option<Tenant>, BackendError>;
}

/// Looks up a principal's role within a tenant.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    /// Returns the principal's role in `tenant_id`, or `None` if unmapped.
    async fn role_for(
        &self,
        principal_id: &PrincipalId,
        tenant_id: &TenantId,
    ) -> Result<Option<Role>, BackendError>;
}

/// An immutable in-memory directory.
///
/// # Examples
///
/// ```
/// use tenantscope_core::directory::StaticTenantDirectory;
/// use tenantscope_core::tenant::{PrincipalId, Role, Tenant, TenantSlug};
///
/// let directory = StaticTenantDirectory::new()
///     .with_tenant(Tenant::active("t-1", TenantSlug::parse("acme").unwrap()))
///     .with_role(PrincipalId::new("user-1"), "t-1", Role::Admin);
/// ```
#[derive(Debug, Default, Clone)]
pub struct StaticTenantDirectory {
    tenants: HashMap<TenantSlug, Tenant>,
    roles: HashMap<(PrincipalId, TenantId), Role>,
}

impl StaticTenantDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tenant.
    pub fn with_tenant(mut self, tenant: Tenant) -> Self {
        self.tenants.insert(tenant.slug.clone(), tenant);
        self
    }

    /// Adds a role mapping.
    pub fn with_role(
        mut self,
        principal_id: PrincipalId,
        tenant_id: impl Into<TenantId>,
        role: Role,
    ) -> Self {
        self.roles.insert((principal_id, tenant_id.into()), role);
        self
    }
}

#[async_trait]
impl TenantDirectory for StaticTenantDirectory {
    async fn find_by_slug(&self, slug: &TenantSlug) -> Result<Option<Tenant>, BackendError> {
        Ok(self.tenants.get(slug).cloned())
    }
}

#[async_trait]
impl RoleDirectory for StaticTenantDirectory {
    async fn role_for(
        &self,
        principal_id: &PrincipalId,
        tenant_id: &TenantId,
    ) -> Result<Option<Role>, BackendError> {
        Ok(self
            .roles
            .get(&(principal_id.clone(), tenant_id.clone()))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::TenantStatus;

    #[tokio::test]
    async fn test_static_directory_lookups() {
        let acme = TenantSlug::parse("acme").unwrap();
        let directory = StaticTenantDirectory::new()
            .with_tenant(Tenant::active("t-1", acme.clone()))
            .with_role(PrincipalId::new("user-1"), "t-1", Role::Manager);

        let tenant = directory.find_by_slug(&acme).await.unwrap().unwrap();
        assert_eq!(tenant.status, TenantStatus::Active);

        let missing = TenantSlug::parse("globex").unwrap();
        assert!(directory.find_by_slug(&missing).await.unwrap().is_none());

        let role = directory
            .role_for(&PrincipalId::new("user-1"), &TenantId::new("t-1"))
            .await
            .unwrap();
        assert_eq!(role, Some(Role::Manager));

        let none = directory
            .role_for(&PrincipalId::new("user-1"), &TenantId::new("t-2"))
            .await
            .unwrap();
        assert_eq!(none, None);
    }
}
