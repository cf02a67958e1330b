//! Principal authorization against a resolved tenant.

use std::sync::Arc;

use tracing::{debug, error};

use crate::directory::RoleDirectory;
use crate::error::AccessError;
use crate::tenant::{Operation, PrincipalId, RequestContext, Role, Tenant};

/// Confirms that a principal may act within a tenant.
///
/// Runs after tenant resolution and before any scoped work. Every failure
/// path is a denial, including a failing role lookup.
pub struct AccessValidator {
    roles: Arc<dyn RoleDirectory>,
}

impl std::fmt::Debug for AccessValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessValidator").finish_non_exhaustive()
    }
}

impl AccessValidator {
    /// Creates a validator over a role directory.
    pub fn new(roles: Arc<dyn RoleDirectory>) -> Self {
        Self { roles }
    }

    /// Returns the principal's role in `tenant`.
    pub async fn authorize(
        &self,
        principal_id: &PrincipalId,
        tenant: &Tenant,
    ) -> Result<Role, AccessError> {
        let denied = || AccessError::Denied {
            principal_id: principal_id.clone(),
            tenant_id: tenant.id.clone(),
        };

        match self.roles.role_for(principal_id, &tenant.id).await {
            Ok(Some(role)) => {
                debug!(principal_id = %principal_id, tenant_id = %tenant.id, role = %role, "principal authorized");
                Ok(role)
            }
            Ok(None) => {
                debug!(principal_id = %principal_id, tenant_id = %tenant.id, "no role mapping");
                Err(denied())
            }
            Err(e) => {
                error!(
                    principal_id = %principal_id,
                    tenant_id = %tenant.id,
                    error = %e,
                    "role lookup failed, denying access"
                );
                Err(denied())
            }
        }
    }

    /// Authorizes an optional principal and builds the request context.
    pub async fn authorize_request(
        &self,
        principal_id: Option<PrincipalId>,
        tenant: Tenant,
    ) -> Result<RequestContext, AccessError> {
        let principal_id = principal_id.ok_or(AccessError::Unauthenticated)?;
        let role = self.authorize(&principal_id, &tenant).await?;
        Ok(RequestContext::new(tenant, principal_id, role))
    }

    /// Requires that the context's role permits `operation`.
    pub fn require(&self, ctx: &RequestContext, operation: Operation) -> Result<(), AccessError> {
        ctx.check_permission(operation).inspect_err(|_| {
            debug!(
                principal_id = %ctx.principal_id(),
                tenant_id = %ctx.tenant_id(),
                role = %ctx.role(),
                operation = %operation,
                "operation not permitted"
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::directory::StaticTenantDirectory;
    use crate::error::BackendError;
    use crate::tenant::{TenantId, TenantSlug};

    fn acme() -> Tenant {
        Tenant::active("t-1", TenantSlug::parse("acme").unwrap())
    }

    fn validator() -> AccessValidator {
        let directory = StaticTenantDirectory::new()
            .with_role(PrincipalId::new("admin"), "t-1", Role::Admin)
            .with_role(PrincipalId::new("clerk"), "t-1", Role::Staff);
        AccessValidator::new(Arc::new(directory))
    }

    struct FailingRoles;

    #[async_trait]
    impl RoleDirectory for FailingRoles {
        async fn role_for(
            &self,
            _principal_id: &PrincipalId,
            _tenant_id: &TenantId,
        ) -> Result<Option<Role>, BackendError> {
            Err(BackendError::Unavailable {
                backend_name: "test".to_string(),
                message: "down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_authorize_returns_role() {
        let role = validator()
            .authorize(&PrincipalId::new("admin"), &acme())
            .await
            .unwrap();
        assert_eq!(role, Role::Admin);
    }

    #[tokio::test]
    async fn test_missing_mapping_is_denied() {
        let err = validator()
            .authorize(&PrincipalId::new("stranger"), &acme())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Denied { .. }));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_denied() {
        let validator = AccessValidator::new(Arc::new(FailingRoles));
        let err = validator
            .authorize(&PrincipalId::new("admin"), &acme())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Denied { .. }));
    }

    #[tokio::test]
    async fn test_authorize_request() {
        let validator = validator();

        let ctx = validator
            .authorize_request(Some(PrincipalId::new("clerk")), acme())
            .await
            .unwrap();
        assert_eq!(ctx.role(), Role::Staff);
        assert_eq!(ctx.tenant_id().as_str(), "t-1");

        let err = validator.authorize_request(None, acme()).await.unwrap_err();
        assert!(matches!(err, AccessError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_require_checks_role() {
        let validator = validator();
        let ctx = validator
            .authorize_request(Some(PrincipalId::new("clerk")), acme())
            .await
            .unwrap();

        assert!(validator.require(&ctx, Operation::Read).is_ok());
        assert!(matches!(
            validator.require(&ctx, Operation::Delete),
            Err(AccessError::OperationNotPermitted { .. })
        ));
    }
}
