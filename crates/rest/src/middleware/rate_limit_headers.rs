//! Rate limit response headers.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tenantscope_core::RateLimitDecision;

pub use axum::http::header::RETRY_AFTER;

/// The window's request limit.
pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");

/// Requests left in the current window.
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Epoch seconds at which the current window ends.
pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Attaches the quota state of an admitted request to its response.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(&X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(&X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(&X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at_secs()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_rate_limit_headers() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: 100,
            remaining: 42,
            reset_at_ms: 1_700_000_060_000,
            degraded: false,
        };
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(&mut headers, &decision);

        assert_eq!(headers[&X_RATELIMIT_LIMIT], "100");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "42");
        assert_eq!(headers[&X_RATELIMIT_RESET], "1700000060");
    }
}
