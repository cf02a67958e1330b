//! The isolation variable contract.
//!
//! An [`IsolationKey`] names the connection-scoped variable that the storage
//! engine's row-level policies consult, the tenant column those policies
//! compare against, and the format a tenant identifier must have before it
//! may be written to the variable.

use serde::{Deserialize, Serialize};

use crate::error::{ScopeError, ValidationError};
use crate::tenant::TenantId;

/// Configuration for the isolation variable.
///
/// # Example
///
/// ```
/// use tenantscope_core::isolation::{IsolationConfig, IsolationKey};
///
/// let config = IsolationConfig {
///     variable: "app.current_tenant".to_string(),
///     ..Default::default()
/// };
/// let key = IsolationKey::new(&config).unwrap();
/// assert_eq!(key.variable(), "app.current_tenant");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationConfig {
    /// Name of the connection-scoped variable, in `namespace.name` form.
    #[serde(default = "default_variable")]
    pub variable: String,

    /// The name of the tenant ID column in tenant-scoped tables.
    #[serde(default = "default_tenant_column")]
    pub tenant_column: String,

    /// Maximum length for tenant IDs.
    #[serde(default = "default_max_tenant_id_length")]
    pub max_tenant_id_length: usize,

    /// Allowed characters in tenant IDs (regex pattern).
    #[serde(default = "default_tenant_id_pattern")]
    pub tenant_id_pattern: String,
}

fn default_variable() -> String {
    "app.current_tenant".to_string()
}

fn default_tenant_column() -> String {
    "tenant_id".to_string()
}

fn default_max_tenant_id_length() -> usize {
    64
}

fn default_tenant_id_pattern() -> String {
    r"^[a-zA-Z0-9_\-]+$".to_string()
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            variable: default_variable(),
            tenant_column: default_tenant_column(),
            max_tenant_id_length: default_max_tenant_id_length(),
            tenant_id_pattern: default_tenant_id_pattern(),
        }
    }
}

/// A validated isolation variable and tenant-id format.
///
/// Backends apply the key to a connection; the key itself never touches a
/// connection. Values produced by [`IsolationKey::render`] are guaranteed to
/// match the configured format, so a malformed tenant id is rejected before
/// any statement is sent.
#[derive(Debug, Clone)]
pub struct IsolationKey {
    variable: String,
    tenant_column: String,
    max_tenant_id_length: usize,
    tenant_pattern: regex::Regex,
}

impl IsolationKey {
    /// Builds a key from configuration, validating every part of it.
    pub fn new(config: &IsolationConfig) -> Result<Self, ValidationError> {
        if !is_variable_name(&config.variable) {
            return Err(ValidationError::InvalidIsolationKey {
                name: config.variable.clone(),
            });
        }
        if !is_safe_identifier(&config.tenant_column) {
            return Err(ValidationError::InvalidIdentifier {
                identifier: config.tenant_column.clone(),
            });
        }
        if config.max_tenant_id_length == 0 {
            return Err(ValidationError::InvalidConfig {
                message: "max_tenant_id_length must be positive".to_string(),
            });
        }
        let tenant_pattern = regex::Regex::new(&config.tenant_id_pattern).map_err(|e| {
            ValidationError::InvalidConfig {
                message: format!("tenant_id_pattern: {}", e),
            }
        })?;

        Ok(Self {
            variable: config.variable.clone(),
            tenant_column: config.tenant_column.clone(),
            max_tenant_id_length: config.max_tenant_id_length,
            tenant_pattern,
        })
    }

    /// Returns the variable name.
    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Returns the tenant column name.
    pub fn tenant_column(&self) -> &str {
        &self.tenant_column
    }

    /// Checks a tenant id against the configured length and pattern.
    pub fn validate(&self, tenant_id: &TenantId) -> Result<(), ValidationError> {
        let id = tenant_id.as_str();

        if id.is_empty() || id.len() > self.max_tenant_id_length {
            return Err(ValidationError::InvalidTenantId {
                value: id.to_string(),
                reason: format!(
                    "length must be between 1 and {} characters",
                    self.max_tenant_id_length
                ),
            });
        }

        if !self.tenant_pattern.is_match(id) {
            return Err(ValidationError::InvalidTenantId {
                value: id.to_string(),
                reason: format!(
                    "does not match required pattern: {}",
                    self.tenant_pattern.as_str()
                ),
            });
        }

        Ok(())
    }

    /// Returns the value to write into the variable for `tenant_id`.
    pub fn render(&self, tenant_id: &TenantId) -> Result<String, ScopeError> {
        self.validate(tenant_id)
            .map_err(|e| ScopeError::ContextSetFailure {
                tenant_id: tenant_id.to_string(),
                message: e.to_string(),
            })?;
        Ok(tenant_id.as_str().to_string())
    }
}

/// Returns `true` for a custom-variable name such as `app.current_tenant`.
fn is_variable_name(name: &str) -> bool {
    match name.split_once('.') {
        Some((namespace, field)) => is_safe_identifier(namespace) && is_safe_identifier(field),
        None => false,
    }
}

/// Returns `true` if `ident` is safe to interpolate into DDL unquoted.
pub fn is_safe_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    ident.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> IsolationKey {
        IsolationKey::new(&IsolationConfig::default()).unwrap()
    }

    #[test]
    fn test_isolation_config_default() {
        let config = IsolationConfig::default();
        assert_eq!(config.variable, "app.current_tenant");
        assert_eq!(config.tenant_column, "tenant_id");
        assert_eq!(config.max_tenant_id_length, 64);
    }

    #[test]
    fn test_isolation_config_serde_defaults() {
        let config: IsolationConfig =
            serde_json::from_str(r#"{"variable": "pecr.tenant_id"}"#).unwrap();
        assert_eq!(config.variable, "pecr.tenant_id");
        assert_eq!(config.tenant_column, "tenant_id");
    }

    #[test]
    fn test_rejects_bad_variable_names() {
        for name in ["current_tenant", "app.", ".x", "app.current-tenant", "app.x;drop", "App.x"] {
            let config = IsolationConfig {
                variable: name.to_string(),
                ..Default::default()
            };
            assert!(IsolationKey::new(&config).is_err(), "{} accepted", name);
        }
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let config = IsolationConfig {
            tenant_id_pattern: "([".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            IsolationKey::new(&config),
            Err(ValidationError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_render_valid_tenant() {
        assert_eq!(key().render(&TenantId::new("t-1")).unwrap(), "t-1");
    }

    #[test]
    fn test_render_rejects_malformed_tenant() {
        let key = key();
        let long = "x".repeat(65);
        for bad in ["", "t'1", "t 1", "t-1;RESET ALL", long.as_str()] {
            let err = key.render(&TenantId::new(bad)).unwrap_err();
            assert!(matches!(err, ScopeError::ContextSetFailure { .. }));
        }
    }

    #[test]
    fn test_uuid_pattern() {
        let config = IsolationConfig {
            tenant_id_pattern:
                r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$".to_string(),
            ..Default::default()
        };
        let key = IsolationKey::new(&config).unwrap();
        assert!(key
            .validate(&TenantId::new("0b6e1f0c-58c5-4a47-9d1e-1f3a2b4c5d6e"))
            .is_ok());
        assert!(key.validate(&TenantId::new("t-1")).is_err());
    }

    #[test]
    fn test_safe_identifier() {
        assert!(is_safe_identifier("audit_log"));
        assert!(is_safe_identifier("_x1"));
        assert!(!is_safe_identifier("1x"));
        assert!(!is_safe_identifier("items; drop"));
        assert!(!is_safe_identifier(""));
    }
}
