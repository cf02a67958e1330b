//! Tenant and role registry tables.

use async_trait::async_trait;

use super::backend::PostgresBackend;
use crate::directory::{RoleDirectory, TenantDirectory, TenantEvent};
use crate::error::{BackendError, BackendResult};
use crate::tenant::{PrincipalId, Role, Tenant, TenantId, TenantSlug, TenantStatus};

pub(super) const REGISTRY_DDL: &str = "
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS tenant_roles (
    principal_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    PRIMARY KEY (principal_id, tenant_id)
);

CREATE INDEX IF NOT EXISTS idx_tenant_roles_tenant ON tenant_roles(tenant_id);
";

fn decode_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::SerializationError {
        message: e.to_string(),
    }
}

impl PostgresBackend {
    /// Inserts or updates a tenant record.
    pub async fn register_tenant(&self, tenant: &Tenant) -> BackendResult<()> {
        let client = self.admin_client().await?;
        client
            .execute(
                "INSERT INTO tenants (id, slug, status) VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO UPDATE SET slug = EXCLUDED.slug, status = EXCLUDED.status",
                &[&tenant.id.as_str(), &tenant.slug.as_str(), &tenant.status.as_str()],
            )
            .await?;
        Ok(())
    }

    /// Changes a tenant's status.
    ///
    /// Returns the invalidation event for resolvers, or `None` if the tenant
    /// is unknown.
    pub async fn set_tenant_status(
        &self,
        tenant_id: &TenantId,
        status: TenantStatus,
    ) -> BackendResult<Option<TenantEvent>> {
        let client = self.admin_client().await?;
        let updated = client
            .execute(
                "UPDATE tenants SET status = $1 WHERE id = $2",
                &[&status.as_str(), &tenant_id.as_str()],
            )
            .await?;
        Ok((updated > 0).then(|| TenantEvent::status_changed(tenant_id.clone(), status)))
    }

    /// Grants `role` to a principal within a tenant, replacing any prior role.
    pub async fn grant_role(
        &self,
        principal_id: &PrincipalId,
        tenant_id: &TenantId,
        role: Role,
    ) -> BackendResult<()> {
        let client = self.admin_client().await?;
        client
            .execute(
                "INSERT INTO tenant_roles (principal_id, tenant_id, role) VALUES ($1, $2, $3)
                 ON CONFLICT (principal_id, tenant_id) DO UPDATE SET role = EXCLUDED.role",
                &[&principal_id.as_str(), &tenant_id.as_str(), &role.as_str()],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for PostgresBackend {
    async fn find_by_slug(&self, slug: &TenantSlug) -> Result<Option<Tenant>, BackendError> {
        let client = self.admin_client().await?;
        let row = client
            .query_opt(
                "SELECT id, slug, status FROM tenants WHERE slug = $1",
                &[&slug.as_str()],
            )
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.get(0);
        let slug: String = row.get(1);
        let status: String = row.get(2);

        Ok(Some(Tenant {
            id: TenantId::new(id),
            slug: TenantSlug::parse(slug).map_err(decode_error)?,
            status: status.parse().map_err(decode_error)?,
        }))
    }
}

#[async_trait]
impl RoleDirectory for PostgresBackend {
    async fn role_for(
        &self,
        principal_id: &PrincipalId,
        tenant_id: &TenantId,
    ) -> Result<Option<Role>, BackendError> {
        let client = self.admin_client().await?;
        let row = client
            .query_opt(
                "SELECT role FROM tenant_roles WHERE principal_id = $1 AND tenant_id = $2",
                &[&principal_id.as_str(), &tenant_id.as_str()],
            )
            .await?;

        row.map(|row| row.get::<_, String>(0).parse::<Role>().map_err(decode_error))
            .transpose()
    }
}
