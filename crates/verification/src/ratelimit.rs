//! Rate limiting middleware for the verification service
//!
//! Per-IP limiting on the whole verification surface. The verify endpoint
//! is called by every recipient of a session at roughly the same moment,
//! so the burst allowance matters more than the sustained rate.

use axum::body::Body;
use governor::middleware::NoOpMiddleware;
use rollcall_common::config::verification::RateLimitConfig;
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

/// Per-IP rate limit layer built from config
pub fn ip_rate_limiter(
    config: &RateLimitConfig,
) -> GovernorLayer<SmartIpKeyExtractor, NoOpMiddleware, Body> {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(config.per_second.max(1) as u64)
            .burst_size(config.burst_size.max(1))
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    GovernorLayer::new(governor_conf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_rate_limiter_creation() {
        let _limiter = ip_rate_limiter(&RateLimitConfig::default());
    }

    #[test]
    fn test_zero_values_do_not_panic() {
        let config = RateLimitConfig {
            enabled: true,
            per_second: 0,
            burst_size: 0,
        };
        let _limiter = ip_rate_limiter(&config);
    }
}
