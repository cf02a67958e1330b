//! Scope manager configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Timeouts and verification settings for tenant scopes.
///
/// # Example
///
/// ```
/// use tenantscope_core::scope::ScopeConfig;
///
/// let config = ScopeConfig {
///     work_timeout_ms: 2_000,
///     ..Default::default()
/// };
/// assert_eq!(config.pool_timeout_ms, 5_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// How long a scope waits for a pooled connection.
    #[serde(default = "default_pool_timeout_ms")]
    pub pool_timeout_ms: u64,

    /// How long scoped work may run before the scope is torn down.
    #[serde(default = "default_work_timeout_ms")]
    pub work_timeout_ms: u64,

    /// Read the variable back after setting and after clearing it.
    ///
    /// A connection whose variable does not read back as expected is
    /// discarded instead of reused.
    #[serde(default = "default_true")]
    pub verify_isolation: bool,
}

fn default_pool_timeout_ms() -> u64 {
    5_000
}

fn default_work_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            pool_timeout_ms: default_pool_timeout_ms(),
            work_timeout_ms: default_work_timeout_ms(),
            verify_isolation: true,
        }
    }
}

impl ScopeConfig {
    /// Returns the pool borrow timeout.
    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }

    /// Returns the work timeout.
    pub fn work_timeout(&self) -> Duration {
        Duration::from_millis(self.work_timeout_ms)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pool_timeout_ms == 0 || self.work_timeout_ms == 0 {
            return Err(ValidationError::InvalidConfig {
                message: "scope timeouts must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_config_default() {
        let config = ScopeConfig::default();
        assert_eq!(config.pool_timeout(), Duration::from_secs(5));
        assert_eq!(config.work_timeout(), Duration::from_secs(30));
        assert!(config.verify_isolation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scope_config_rejects_zero_timeout() {
        let config = ScopeConfig {
            work_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
