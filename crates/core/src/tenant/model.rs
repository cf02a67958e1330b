//! The tenant record referenced by the isolation core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::id::{TenantId, TenantSlug};
use crate::error::ValidationError;

/// Lifecycle status of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    /// The tenant is serving traffic.
    Active,
    /// The tenant is suspended and must resolve as not found.
    Suspended,
}

impl TenantStatus {
    /// Returns the storage representation of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            other => Err(ValidationError::InvalidConfig {
                message: format!("unknown tenant status '{}'", other),
            }),
        }
    }
}

/// A tenant as known to the tenant registry.
///
/// Tenants are created and suspended by an administrative process. The
/// isolation core only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Opaque identifier written to the isolation column.
    pub id: TenantId,
    /// Unique human-readable key.
    pub slug: TenantSlug,
    /// Lifecycle status.
    pub status: TenantStatus,
}

impl Tenant {
    /// Creates an active tenant.
    pub fn active(id: impl Into<TenantId>, slug: TenantSlug) -> Self {
        Self {
            id: id.into(),
            slug,
            status: TenantStatus::Active,
        }
    }

    /// Returns `true` if the tenant may serve requests.
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}
