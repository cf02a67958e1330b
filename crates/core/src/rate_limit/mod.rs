//! Per-tenant, per-operation fixed-window quotas.
//!
//! Time is cut into windows of `window_ms`. A request at `now_ms` belongs to
//! window `floor(now_ms / window_ms)` and increments the counter
//! `rate_limit:{tenant}:{operation}:{window}`. The counter lives in an
//! external [`CounterStore`] and expires with the window, so a new window
//! always starts from zero.
//!
//! When the store errors or times out the rule's [`FailMode`] decides. The
//! default is to let the request through and mark the decision degraded.

mod clock;
mod config;
#[cfg(feature = "redis")]
mod redis_store;
mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DEFAULT_CLASS, FailMode, RateLimitConfig, RateLimitRule};
#[cfg(feature = "redis")]
pub use redis_store::RedisCounterStore;
pub use store::{CounterStore, InMemoryCounterStore};

use crate::error::{CounterStoreError, RateLimitError};
use crate::tenant::TenantId;

/// Prefix of every counter key.
pub const KEY_PREFIX: &str = "rate_limit";

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The class threshold.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// End of the current window, in epoch milliseconds.
    pub reset_at_ms: u64,
    /// Set when the counter store failed and the rule's fail mode decided.
    pub degraded: bool,
}

impl RateLimitDecision {
    /// End of the current window, in epoch seconds.
    pub fn reset_at_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }

    /// End of the current window.
    pub fn reset_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.reset_at_ms as i64).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Seconds until the window resets, as of `now_ms`.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000)
    }
}

/// Builds the counter key for a tenant, operation and window index.
pub fn counter_key(tenant_id: &TenantId, operation: &str, window: u64) -> String {
    format!("{KEY_PREFIX}:{tenant_id}:{operation}:{window}")
}

/// Fixed-window rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter using wall-clock time.
    pub fn new(config: RateLimitConfig, store: Arc<dyn CounterStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Creates a limiter with an explicit clock.
    pub fn with_clock(
        config: RateLimitConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            clock,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Returns the counter store.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Returns the limiter's current time in epoch milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Counts one request and reports whether it is within quota.
    ///
    /// Fails only when no usable rule covers the operation: there is neither
    /// a class rule nor a default, or the matching rule has a zero window or
    /// limit.
    pub async fn check(
        &self,
        tenant_id: &TenantId,
        operation: &str,
    ) -> Result<RateLimitDecision, RateLimitError> {
        self.check_at(tenant_id, operation, self.clock.now_ms()).await
    }

    async fn check_at(
        &self,
        tenant_id: &TenantId,
        operation: &str,
        now_ms: u64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let (class, rule) =
            self.config
                .rule_for(operation)
                .ok_or_else(|| RateLimitError::Unconfigured {
                    operation: operation.to_string(),
                })?;
        rule.validate(class).map_err(|e| RateLimitError::InvalidRule {
            class: class.to_string(),
            message: e.to_string(),
        })?;

        let window = now_ms / rule.window_ms;
        let reset_at_ms = (window + 1) * rule.window_ms;
        let key = counter_key(tenant_id, operation, window);

        let timeout = self.config.store_timeout();
        let counted = match tokio::time::timeout(timeout, self.store.increment(&key, rule.window()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(CounterStoreError::Timeout {
                timeout_ms: self.config.store_timeout_ms,
            }),
        };

        let decision = match counted {
            Ok(count) => {
                let allowed = count <= u64::from(rule.limit);
                let remaining = u64::from(rule.limit).saturating_sub(count) as u32;
                RateLimitDecision {
                    allowed,
                    limit: rule.limit,
                    remaining,
                    reset_at_ms,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(
                    tenant_id = %tenant_id,
                    operation = %operation,
                    class = %class,
                    store = self.store.name(),
                    fail_mode = %rule.on_store_failure,
                    error = %e,
                    "rate limit counter store failed"
                );
                let allowed = rule.on_store_failure == FailMode::Open;
                RateLimitDecision {
                    allowed,
                    limit: rule.limit,
                    remaining: if allowed { rule.limit } else { 0 },
                    reset_at_ms,
                    degraded: true,
                }
            }
        };

        if !decision.allowed {
            debug!(
                tenant_id = %tenant_id,
                operation = %operation,
                limit = decision.limit,
                reset_at_ms = decision.reset_at_ms,
                "rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Like [`check`](Self::check), but turns a denial into an error.
    pub async fn enforce(
        &self,
        tenant_id: &TenantId,
        operation: &str,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let now_ms = self.clock.now_ms();
        let decision = self.check_at(tenant_id, operation, now_ms).await?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(RateLimitError::Exceeded {
                tenant_id: tenant_id.clone(),
                operation: operation.to_string(),
                limit: decision.limit,
                reset_at: decision.reset_at(),
                retry_after_secs: decision.retry_after_secs(now_ms),
            })
        }
    }

    /// Checks that the counter store is reachable.
    pub async fn health_check(&self) -> Result<(), CounterStoreError> {
        self.store.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    const WINDOW_MS: u64 = 60_000;

    fn limiter(limit: u32, clock: Arc<ManualClock>) -> (RateLimiter, Arc<InMemoryCounterStore>) {
        let store = Arc::new(InMemoryCounterStore::new());
        let config = RateLimitConfig::empty()
            .with_rule("write", RateLimitRule::new(limit, Duration::from_millis(WINDOW_MS)));
        (RateLimiter::with_clock(config, store.clone(), clock), store)
    }

    #[tokio::test]
    async fn test_exactly_threshold_requests_pass() {
        let clock = Arc::new(ManualClock::new(10 * WINDOW_MS + 5));
        let (limiter, _) = limiter(3, clock);
        let tenant = TenantId::new("t-1");

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check(&tenant, "write").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 3);
            assert_eq!(decision.reset_at_ms, 11 * WINDOW_MS);
            assert!(!decision.degraded);
        }

        let denied = limiter.check(&tenant, "write").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test]
    async fn test_new_window_starts_at_zero() {
        let clock = Arc::new(ManualClock::new(WINDOW_MS - 1));
        let (limiter, _) = limiter(1, clock.clone());
        let tenant = TenantId::new("t-1");

        assert!(limiter.check(&tenant, "write").await.unwrap().allowed);
        assert!(!limiter.check(&tenant, "write").await.unwrap().allowed);

        // Exactly on the boundary belongs to the new window.
        clock.set(WINDOW_MS);
        let decision = limiter.check(&tenant, "write").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.reset_at_ms, 2 * WINDOW_MS);
    }

    #[tokio::test]
    async fn test_counters_are_per_tenant_and_operation() {
        let clock = Arc::new(ManualClock::new(0));
        let (limiter, store) = limiter(1, clock);

        assert!(limiter.check(&TenantId::new("t-1"), "write").await.unwrap().allowed);
        assert!(limiter.check(&TenantId::new("t-2"), "write").await.unwrap().allowed);
        assert!(limiter.check(&TenantId::new("t-1"), "write:bulk").await.unwrap().allowed);

        assert_eq!(store.get("rate_limit:t-1:write:0"), Some(1));
        assert_eq!(store.get("rate_limit:t-1:write:bulk:0"), Some(1));
    }

    #[tokio::test]
    async fn test_enforce_returns_exceeded() {
        let clock = Arc::new(ManualClock::new(0));
        let (limiter, _) = limiter(1, clock);
        let tenant = TenantId::new("t-1");

        limiter.enforce(&tenant, "write").await.unwrap();
        let err = limiter.enforce(&tenant, "write").await.unwrap_err();
        match err {
            RateLimitError::Exceeded {
                limit,
                reset_at,
                retry_after_secs,
                ..
            } => {
                assert_eq!(limit, 1);
                assert_eq!(reset_at.timestamp_millis(), WINDOW_MS as i64);
                // Measured on the manual clock, not wall time
                assert_eq!(retry_after_secs, WINDOW_MS / 1000);
            }
            other => panic!("expected exceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let clock = Arc::new(ManualClock::new(0));
        let (limiter, store) = limiter(1, clock);
        store.set_failing(true);

        for _ in 0..5 {
            let decision = limiter.check(&TenantId::new("t-1"), "write").await.unwrap();
            assert!(decision.allowed);
            assert!(decision.degraded);
            assert_eq!(decision.remaining, 1);
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed_when_configured() {
        let store = Arc::new(InMemoryCounterStore::new());
        store.set_failing(true);
        let config = RateLimitConfig::empty().with_rule(
            "auth",
            RateLimitRule::new(5, Duration::from_secs(60)).on_store_failure(FailMode::Closed),
        );
        let limiter = RateLimiter::with_clock(config, store, Arc::new(ManualClock::new(0)));

        let decision = limiter.check(&TenantId::new("t-1"), "auth:login").await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.degraded);
    }

    #[derive(Debug)]
    struct StalledStore;

    #[async_trait]
    impl CounterStore for StalledStore {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn increment(&self, _key: &str, _ttl: Duration) -> Result<u64, CounterStoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_fails_open() {
        let config = RateLimitConfig::default();
        let limiter = RateLimiter::with_clock(
            config,
            Arc::new(StalledStore),
            Arc::new(ManualClock::new(0)),
        );

        let decision = limiter.check(&TenantId::new("t-1"), "read").await.unwrap();
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(decision.limit, 100);
    }

    #[tokio::test]
    async fn test_unconfigured_fails_closed() {
        let limiter = RateLimiter::with_clock(
            RateLimitConfig::empty(),
            Arc::new(InMemoryCounterStore::new()),
            Arc::new(ManualClock::new(0)),
        );
        let err = limiter.check(&TenantId::new("t-1"), "write").await.unwrap_err();
        assert!(matches!(err, RateLimitError::Unconfigured { .. }));
    }

    #[tokio::test]
    async fn test_zero_window_rule_is_rejected() {
        let store = Arc::new(InMemoryCounterStore::new());
        let config = RateLimitConfig::empty()
            .with_rule("read", RateLimitRule::new(1, Duration::ZERO));
        let limiter = RateLimiter::with_clock(config, store.clone(), Arc::new(ManualClock::new(0)));

        let err = limiter.check(&TenantId::new("t-1"), "read").await.unwrap_err();
        match err {
            RateLimitError::InvalidRule { class, .. } => assert_eq!(class, "read"),
            other => panic!("expected invalid rule, got {other:?}"),
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_decision_time_helpers() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_at_ms: 120_000,
            degraded: false,
        };
        assert_eq!(decision.reset_at_secs(), 120);
        assert_eq!(decision.retry_after_secs(118_500), 2);
        assert_eq!(decision.retry_after_secs(130_000), 0);
    }
}
