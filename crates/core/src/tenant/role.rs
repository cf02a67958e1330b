//! Tenant roles and the operations they permit.
//!
//! Roles are ordered by privilege. A principal's role is scoped to one tenant;
//! the same principal may hold different roles in different tenants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Operations a role may be permitted to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Read tenant data.
    Read,
    /// Create new records.
    Create,
    /// Update existing records.
    Update,
    /// Delete records.
    Delete,
    /// Manage tenant settings and staff role assignments.
    Manage,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
            Operation::Manage => write!(f, "manage"),
        }
    }
}

/// A principal's role within one tenant.
///
/// Variants are declared from least to most privileged so the derived
/// ordering matches the privilege hierarchy.
///
/// # Examples
///
/// ```
/// use tenantscope_core::tenant::{Operation, Role};
///
/// assert!(Role::Admin > Role::Staff);
/// assert!(Role::Manager.at_least(Role::Staff));
/// assert!(Role::Staff.permits(Operation::Update));
/// assert!(!Role::Customer.permits(Operation::Create));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End customer of the tenant. Read access only.
    Customer,
    /// Staff member. May read and update.
    Staff,
    /// Manager. May read, create and update.
    Manager,
    /// Tenant administrator. Full access.
    Admin,
}

impl Role {
    /// All roles from least to most privileged.
    pub const ALL: [Role; 4] = [Role::Customer, Role::Staff, Role::Manager, Role::Admin];

    /// Returns the numeric privilege level used when comparing roles.
    pub fn level(self) -> u8 {
        match self {
            Role::Customer => 20,
            Role::Staff => 40,
            Role::Manager => 60,
            Role::Admin => 80,
        }
    }

    /// Returns `true` if this role is at least as privileged as `required`.
    pub fn at_least(self, required: Role) -> bool {
        self >= required
    }

    /// Returns `true` if this role permits the given operation.
    pub fn permits(self, operation: Operation) -> bool {
        match self {
            Role::Admin => true,
            Role::Manager => matches!(
                operation,
                Operation::Read | Operation::Create | Operation::Update
            ),
            Role::Staff => matches!(operation, Operation::Read | Operation::Update),
            Role::Customer => operation == Operation::Read,
        }
    }

    /// Returns the storage representation of this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Staff => "staff",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "staff" => Ok(Role::Staff),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(ValidationError::InvalidConfig {
                message: format!("unknown role '{}'", other),
            }),
        }
    }
}
