//! Tenant and role registry tables.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use super::backend::SqliteBackend;
use crate::directory::{RoleDirectory, TenantDirectory, TenantEvent};
use crate::error::{BackendError, BackendResult};
use crate::tenant::{PrincipalId, Role, Tenant, TenantId, TenantSlug, TenantStatus};

pub(super) const REGISTRY_DDL: &str = "
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tenant_roles (
    principal_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    PRIMARY KEY (principal_id, tenant_id)
);

CREATE INDEX IF NOT EXISTS idx_tenant_roles_tenant ON tenant_roles(tenant_id);
";

fn decode_tenant(id: String, slug: String, status: String) -> BackendResult<Tenant> {
    let slug = TenantSlug::parse(slug).map_err(|e| BackendError::SerializationError {
        message: e.to_string(),
    })?;
    let status = status
        .parse::<TenantStatus>()
        .map_err(|e| BackendError::SerializationError {
            message: e.to_string(),
        })?;
    Ok(Tenant {
        id: TenantId::new(id),
        slug,
        status,
    })
}

impl SqliteBackend {
    /// Inserts or updates a tenant record.
    pub async fn register_tenant(&self, tenant: &Tenant) -> BackendResult<()> {
        let tenant = tenant.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO tenants (id, slug, status, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET slug = excluded.slug, status = excluded.status",
                params![
                    tenant.id.as_str(),
                    tenant.slug.as_str(),
                    tenant.status.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Changes a tenant's status.
    ///
    /// Returns the event resolvers must see so cached lookups stop serving
    /// the old status, or `None` if the tenant is unknown.
    pub async fn set_tenant_status(
        &self,
        tenant_id: &TenantId,
        status: TenantStatus,
    ) -> BackendResult<Option<TenantEvent>> {
        let tenant_id = tenant_id.clone();
        self.run_blocking(move |conn| {
            let updated = conn.execute(
                "UPDATE tenants SET status = ?1 WHERE id = ?2",
                params![status.as_str(), tenant_id.as_str()],
            )?;
            Ok((updated > 0).then(|| TenantEvent::status_changed(tenant_id, status)))
        })
        .await
    }

    /// Grants `role` to a principal within a tenant, replacing any prior role.
    pub async fn grant_role(
        &self,
        principal_id: &PrincipalId,
        tenant_id: &TenantId,
        role: Role,
    ) -> BackendResult<()> {
        let principal_id = principal_id.clone();
        let tenant_id = tenant_id.clone();
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO tenant_roles (principal_id, tenant_id, role) VALUES (?1, ?2, ?3)
                 ON CONFLICT(principal_id, tenant_id) DO UPDATE SET role = excluded.role",
                params![principal_id.as_str(), tenant_id.as_str(), role.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    /// Removes a principal's role within a tenant.
    pub async fn revoke_role(
        &self,
        principal_id: &PrincipalId,
        tenant_id: &TenantId,
    ) -> BackendResult<bool> {
        let principal_id = principal_id.clone();
        let tenant_id = tenant_id.clone();
        self.run_blocking(move |conn| {
            let removed = conn.execute(
                "DELETE FROM tenant_roles WHERE principal_id = ?1 AND tenant_id = ?2",
                params![principal_id.as_str(), tenant_id.as_str()],
            )?;
            Ok(removed > 0)
        })
        .await
    }
}

#[async_trait]
impl TenantDirectory for SqliteBackend {
    async fn find_by_slug(&self, slug: &TenantSlug) -> Result<Option<Tenant>, BackendError> {
        let slug = slug.clone();
        self.run_blocking(move |conn| {
            let row: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT id, slug, status FROM tenants WHERE slug = ?1",
                    params![slug.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            row.map(|(id, slug, status)| decode_tenant(id, slug, status))
                .transpose()
        })
        .await
    }
}

#[async_trait]
impl RoleDirectory for SqliteBackend {
    async fn role_for(
        &self,
        principal_id: &PrincipalId,
        tenant_id: &TenantId,
    ) -> Result<Option<Role>, BackendError> {
        let principal_id = principal_id.clone();
        let tenant_id = tenant_id.clone();
        self.run_blocking(move |conn| {
            let role: Option<String> = conn
                .query_row(
                    "SELECT role FROM tenant_roles WHERE principal_id = ?1 AND tenant_id = ?2",
                    params![principal_id.as_str(), tenant_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            role.map(|r| {
                r.parse::<Role>()
                    .map_err(|e| BackendError::SerializationError {
                        message: e.to_string(),
                    })
            })
            .transpose()
        })
        .await
    }
}
