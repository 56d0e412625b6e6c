//! Storefront configuration loaded from environment variables with defaults.

use std::env;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Unpaid orders hold their units this long.
pub const DEFAULT_RESERVATION_TTL_SECS: u64 = 15 * 60;
/// Longest accepted reservation window (one week).
pub const MAX_RESERVATION_TTL_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_CURRENCY: &str = "INR";
const DEV_GATEWAY_SECRET: &str = "unitcart-dev-secret";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorefrontConfig {
    /// Seconds a pending order keeps its reserved units.
    pub reservation_ttl_secs: u64,
    /// Seconds between expiry sweeps.
    pub sweep_interval_secs: u64,
    /// ISO currency code sent to the payment gateway.
    pub currency: String,
    /// Shared secret used to verify gateway signatures.
    pub gateway_key_secret: String,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: DEFAULT_RESERVATION_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            currency: DEFAULT_CURRENCY.to_string(),
            gateway_key_secret: DEV_GATEWAY_SECRET.to_string(),
        }
    }
}

impl StorefrontConfig {
    /// Read `UNITCART_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable or out-of-range values fall back
    /// to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let gateway_key_secret = match lookup("UNITCART_GATEWAY_KEY_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("UNITCART_GATEWAY_KEY_SECRET not set; using development secret");
                defaults.gateway_key_secret
            }
        };

        Self {
            reservation_ttl_secs: lookup("UNITCART_RESERVATION_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs| (1..=MAX_RESERVATION_TTL_SECS).contains(secs))
                .unwrap_or(defaults.reservation_ttl_secs),
            sweep_interval_secs: lookup("UNITCART_SWEEP_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.sweep_interval_secs),
            currency: lookup("UNITCART_CURRENCY")
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(defaults.currency),
            gateway_key_secret,
        }
    }

    /// Capped at [`MAX_RESERVATION_TTL_SECS`].
    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl_secs = ttl.as_secs().min(MAX_RESERVATION_TTL_SECS);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_secs = interval.as_secs();
        self
    }

    pub fn with_gateway_key_secret(mut self, secret: impl Into<String>) -> Self {
        self.gateway_key_secret = secret.into();
        self
    }

    pub fn reservation_ttl(&self) -> TimeDelta {
        i64::try_from(self.reservation_ttl_secs.min(MAX_RESERVATION_TTL_SECS))
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or_else(|| TimeDelta::minutes(15))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
