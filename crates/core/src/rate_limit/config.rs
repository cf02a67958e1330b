//! Rate limit rules and the default class presets.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Name of the fallback class.
pub const DEFAULT_CLASS: &str = "default";

/// What to do when the counter store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Allow the request and mark the decision as degraded.
    #[default]
    Open,
    /// Deny the request.
    Closed,
}

impl fmt::Display for FailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailMode::Open => write!(f, "open"),
            FailMode::Closed => write!(f, "closed"),
        }
    }
}

/// A quota for one operation class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Requests allowed per window.
    pub limit: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Behaviour when the counter store fails.
    #[serde(default)]
    pub on_store_failure: FailMode,
}

impl RateLimitRule {
    /// Creates a fail-open rule.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window_ms: window.as_millis() as u64,
            on_store_failure: FailMode::Open,
        }
    }

    /// Sets the store failure mode.
    pub fn on_store_failure(mut self, mode: FailMode) -> Self {
        self.on_store_failure = mode;
        self
    }

    /// Returns the window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Rejects rules with a zero limit or a zero window.
    pub fn validate(&self, class: &str) -> Result<(), ValidationError> {
        if self.limit == 0 {
            return Err(ValidationError::InvalidConfig {
                message: format!("rate limit class '{class}' has a zero limit"),
            });
        }
        if self.window_ms == 0 {
            return Err(ValidationError::InvalidConfig {
                message: format!("rate limit class '{class}' has a zero window"),
            });
        }
        Ok(())
    }
}

/// Parses `limit/window`, e.g. `100/60s` or `5/1m`.
impl FromStr for RateLimitRule {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ValidationError::InvalidConfig {
            message: format!("invalid rate limit rule '{s}': {reason}"),
        };

        let (limit, window) = s
            .split_once('/')
            .ok_or_else(|| invalid("expected <limit>/<window>"))?;
        let limit = limit
            .trim()
            .parse::<u32>()
            .map_err(|_| invalid("limit is not a number"))?;
        let window = humantime::parse_duration(window.trim())
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self::new(limit, window))
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Rules keyed by operation class.
    #[serde(default = "default_rules")]
    pub rules: HashMap<String, RateLimitRule>,

    /// Deadline for one counter-store round-trip.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_store_timeout_ms() -> u64 {
    250
}

fn default_rules() -> HashMap<String, RateLimitRule> {
    let minute = Duration::from_secs(60);
    [
        (DEFAULT_CLASS, 60),
        ("general", 100),
        ("auth", 5),
        ("read", 100),
        ("write", 20),
        ("upload", 10),
    ]
    .into_iter()
    .map(|(class, limit)| (class.to_string(), RateLimitRule::new(limit, minute)))
    .collect()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl RateLimitConfig {
    /// Creates a configuration with no rules.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }

    /// Adds or replaces the rule for `class`.
    pub fn with_rule(mut self, class: impl Into<String>, rule: RateLimitRule) -> Self {
        self.rules.insert(class.into(), rule);
        self
    }

    /// Returns the store round-trip deadline.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Returns the class and rule for an operation key.
    ///
    /// The class is the part of the key before the first `:`. Unknown
    /// classes fall back to [`DEFAULT_CLASS`].
    pub fn rule_for<'a>(&'a self, operation: &str) -> Option<(&'a str, &'a RateLimitRule)> {
        let class = operation.split(':').next().unwrap_or(operation);
        self.rules
            .get_key_value(class)
            .or_else(|| self.rules.get_key_value(DEFAULT_CLASS))
            .map(|(class, rule)| (class.as_str(), rule))
    }

    /// Validates every rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.store_timeout_ms == 0 {
            return Err(ValidationError::InvalidConfig {
                message: "store_timeout_ms must be greater than zero".to_string(),
            });
        }
        for (class, rule) in &self.rules {
            rule.validate(class)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_presets() {
        let config = RateLimitConfig::default();
        let expected = [
            ("default", 60),
            ("general", 100),
            ("auth", 5),
            ("read", 100),
            ("write", 20),
            ("upload", 10),
        ];
        for (class, limit) in expected {
            let rule = &config.rules[class];
            assert_eq!(rule.limit, limit, "class {class}");
            assert_eq!(rule.window_ms, 60_000);
            assert_eq!(rule.on_store_failure, FailMode::Open);
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rule_for_uses_class_prefix() {
        let config = RateLimitConfig::default();
        let (class, rule) = config.rule_for("auth:login").unwrap();
        assert_eq!(class, "auth");
        assert_eq!(rule.limit, 5);

        let (class, _) = config.rule_for("write").unwrap();
        assert_eq!(class, "write");
    }

    #[test]
    fn test_unknown_class_falls_back_to_default() {
        let config = RateLimitConfig::default();
        let (class, rule) = config.rule_for("export:csv").unwrap();
        assert_eq!(class, DEFAULT_CLASS);
        assert_eq!(rule.limit, 60);
    }

    #[test]
    fn test_no_rule_and_no_default() {
        let config = RateLimitConfig::empty().with_rule("auth", RateLimitRule::new(5, Duration::from_secs(60)));
        assert!(config.rule_for("write").is_none());
    }

    #[test]
    fn test_parse_rule() {
        let rule: RateLimitRule = "100/60s".parse().unwrap();
        assert_eq!(rule.limit, 100);
        assert_eq!(rule.window_ms, 60_000);

        let rule: RateLimitRule = " 5 / 1m ".parse().unwrap();
        assert_eq!(rule.limit, 5);
        assert_eq!(rule.window_ms, 60_000);

        assert!("100".parse::<RateLimitRule>().is_err());
        assert!("x/60s".parse::<RateLimitRule>().is_err());
        assert!("10/forever".parse::<RateLimitRule>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = RateLimitConfig::empty().with_rule("write", RateLimitRule::new(0, Duration::from_secs(1)));
        assert!(config.validate().is_err());

        let config = RateLimitConfig::empty().with_rule("write", RateLimitRule::new(1, Duration::ZERO));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fail_mode_serde() {
        let rule: RateLimitRule =
            serde_json::from_str(r#"{"limit": 5, "window_ms": 1000, "on_store_failure": "closed"}"#)
                .unwrap();
        assert_eq!(rule.on_store_failure, FailMode::Closed);

        let rule: RateLimitRule =
            serde_json::from_str(r#"{"limit": 5, "window_ms": 1000}"#).unwrap();
        assert_eq!(rule.on_store_failure, FailMode::Open);
    }
}
