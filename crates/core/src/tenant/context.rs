//! Per-request context.
//!
//! A [`RequestContext`] is created once tenant resolution and authorization
//! have succeeded. It is passed explicitly to every function that needs the
//! tenant identity and is dropped when the request completes.

use uuid::Uuid;

use super::id::{PrincipalId, TenantId, TenantSlug};
use super::model::Tenant;
use super::role::{Operation, Role};
use crate::error::{AccessError, ValidationError};

/// The resolved identity of one inbound request.
///
/// # Examples
///
/// ```
/// use tenantscope_core::tenant::{
///     Operation, PrincipalId, RequestContext, Role, Tenant, TenantSlug,
/// };
///
/// let tenant = Tenant::active("t-1", TenantSlug::parse("acme").unwrap());
/// let ctx = RequestContext::new(tenant, PrincipalId::new("user-1"), Role::Staff);
///
/// assert_eq!(ctx.tenant_id().as_str(), "t-1");
/// assert!(ctx.check_permission(Operation::Update).is_ok());
/// assert!(ctx.check_permission(Operation::Delete).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    tenant_id: TenantId,
    slug: TenantSlug,
    principal_id: PrincipalId,
    role: Role,
    request_id: String,
}

impl RequestContext {
    /// Creates a context with a freshly generated request ID.
    pub fn new(tenant: Tenant, principal_id: PrincipalId, role: Role) -> Self {
        Self {
            tenant_id: tenant.id,
            slug: tenant.slug,
            principal_id,
            role,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Creates a builder for contexts assembled from several sources.
    pub fn builder() -> RequestContextBuilder {
        RequestContextBuilder::default()
    }

    /// Replaces the request ID, e.g. with one propagated by a gateway.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Returns the tenant identifier.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns the tenant slug.
    pub fn slug(&self) -> &TenantSlug {
        &self.slug
    }

    /// Returns the acting principal.
    pub fn principal_id(&self) -> &PrincipalId {
        &self.principal_id
    }

    /// Returns the principal's role in this tenant.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the request identifier used for log correlation.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Checks that the principal's role permits `operation`.
    pub fn check_permission(&self, operation: Operation) -> Result<(), AccessError> {
        if self.role.permits(operation) {
            Ok(())
        } else {
            Err(AccessError::OperationNotPermitted {
                role: self.role,
                operation,
            })
        }
    }
}

/// Builder for [`RequestContext`].
#[derive(Default)]
pub struct RequestContextBuilder {
    tenant: Option<Tenant>,
    principal_id: Option<PrincipalId>,
    role: Option<Role>,
    request_id: Option<String>,
}

impl RequestContextBuilder {
    /// Sets the resolved tenant.
    pub fn tenant(mut self, tenant: Tenant) -> Self {
        self.tenant = Some(tenant);
        self
    }

    /// Sets the acting principal.
    pub fn principal_id(mut self, principal_id: PrincipalId) -> Self {
        self.principal_id = Some(principal_id);
        self
    }

    /// Sets the authorized role.
    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Sets the request ID.
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Builds the context, returning an error if a required field is missing.
    pub fn build(self) -> Result<RequestContext, ValidationError> {
        let tenant = self.tenant.ok_or_else(|| missing("tenant"))?;
        let principal_id = self.principal_id.ok_or_else(|| missing("principal_id"))?;
        let role = self.role.ok_or_else(|| missing("role"))?;

        let ctx = RequestContext::new(tenant, principal_id, role);
        Ok(match self.request_id {
            Some(id) => ctx.with_request_id(id),
            None => ctx,
        })
    }
}

fn missing(field: &str) -> ValidationError {
    ValidationError::MissingRequiredField {
        field: field.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> Tenant {
        Tenant::active("t-1", TenantSlug::parse("acme").unwrap())
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestContext::new(tenant(), PrincipalId::new("u"), Role::Admin);
        let b = RequestContext::new(tenant(), PrincipalId::new("u"), Role::Admin);
        assert_ne!(a.request_id(), b.request_id());
    }

    #[test]
    fn test_builder_requires_role() {
        let err = RequestContext::builder()
            .tenant(tenant())
            .principal_id(PrincipalId::new("u"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("role"));
    }

    #[test]
    fn test_builder_keeps_request_id() {
        let ctx = RequestContext::builder()
            .tenant(tenant())
            .principal_id(PrincipalId::new("u"))
            .role(Role::Customer)
            .request_id("req-42")
            .build()
            .unwrap();
        assert_eq!(ctx.request_id(), "req-42");
        assert_eq!(ctx.slug().as_str(), "acme");
    }

    #[test]
    fn test_check_permission_denies_with_role() {
        let ctx = RequestContext::new(tenant(), PrincipalId::new("u"), Role::Customer);
        match ctx.check_permission(Operation::Create) {
            Err(AccessError::OperationNotPermitted { role, operation }) => {
                assert_eq!(role, Role::Customer);
                assert_eq!(operation, Operation::Create);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
