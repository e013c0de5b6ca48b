//! Verification coordinator configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Verification coordinator configuration
///
/// Controls request lifetimes, the default comparison threshold and the
/// rate limits applied to the verification HTTP surface.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VerificationConfig {
    /// Minimum accepted request TTL in seconds
    ///
    /// Caller-provided TTLs below this are clamped up. A request that can
    /// expire before recipients receive their push is useless.
    #[serde(default = "default_ttl_min_secs")]
    pub ttl_min_secs: u64,

    /// Maximum accepted request TTL in seconds
    ///
    /// Caller-provided TTLs above this are clamped down so abandoned
    /// requests cannot pin ephemeral state for hours.
    #[serde(default = "default_ttl_max_secs")]
    pub ttl_max_secs: u64,

    /// TTL applied when the caller does not request one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Similarity threshold applied when the caller does not override it
    ///
    /// A comparison counts as a match when similarity >= threshold.
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,

    /// Interval of the background sweep that reclaims expired ephemeral
    /// entries, in seconds. Expiry is enforced lazily on access; the sweep
    /// only frees memory.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Rate limiting configuration for the verification HTTP surface
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Rate limit configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Whether per-IP rate limiting is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sustained requests per second per IP
    #[serde(default = "default_per_second")]
    pub per_second: u32,

    /// Burst allowance per IP
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl VerificationConfig {
    /// Clamp a requested TTL into the configured window
    ///
    /// `None` selects the configured default (itself clamped, so a
    /// misconfigured default cannot escape the window).
    pub fn clamp_ttl(&self, requested_secs: Option<u64>) -> Duration {
        let secs = requested_secs
            .unwrap_or(self.default_ttl_secs)
            .clamp(self.ttl_min_secs, self.ttl_max_secs);
        Duration::from_secs(secs)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_min_secs == 0 || self.ttl_min_secs > self.ttl_max_secs {
            return Err(ConfigError::InvalidValue {
                field: "verification.ttl_min_secs".to_string(),
                value: self.ttl_min_secs.to_string(),
            });
        }
        if !(self.default_threshold > 0.0 && self.default_threshold <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "verification.default_threshold".to_string(),
                value: self.default_threshold.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            ttl_min_secs: default_ttl_min_secs(),
            ttl_max_secs: default_ttl_max_secs(),
            default_ttl_secs: default_ttl_secs(),
            default_threshold: default_threshold(),
            sweep_interval_secs: default_sweep_interval_secs(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            per_second: default_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

fn default_ttl_min_secs() -> u64 {
    60 // 1 minute
}

fn default_ttl_max_secs() -> u64 {
    7200 // 2 hours
}

fn default_ttl_secs() -> u64 {
    900 // 15 minutes
}

fn default_threshold() -> f64 {
    0.75
}

fn default_sweep_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_true() -> bool {
    true
}

fn default_per_second() -> u32 {
    10
}

fn default_burst_size() -> u32 {
    100
}
