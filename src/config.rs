//! Runtime configuration for the order/payment core.

use crate::error::{LedgerError, Result};
use std::str::FromStr;
use std::time::Duration;

/// Configuration shared by the services and the webhook processor.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Environment: development | staging | production
    pub environment: String,
    /// Shared HMAC secret for provider webhooks
    pub webhook_secret: String,
    /// Accepted clock skew for `X-Webhook-Timestamp`, in seconds
    pub webhook_tolerance_secs: i64,
    /// Attempts per webhook apply before dead-lettering
    pub webhook_max_attempts: u32,
    /// Backoff unit; the delay after attempt `n` is `2^n` units
    pub webhook_retry_base: Duration,
    /// TTL of cached order views
    pub order_cache_ttl: Duration,
    /// Interval of the background cache purge
    pub cache_sweep_interval: Duration,
    /// Lifetime of a PENDING payment intent
    pub payment_ttl: Duration,
    /// Currency for new and inferred payments
    pub payment_currency: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            webhook_secret: "dev-WEBHOOK_SECRET-not-for-production".to_string(),
            webhook_tolerance_secs: 300,
            webhook_max_attempts: 3,
            webhook_retry_base: Duration::from_secs(1),
            order_cache_ttl: Duration::from_secs(30),
            cache_sweep_interval: Duration::from_secs(60),
            payment_ttl: Duration::from_secs(15 * 60),
            payment_currency: "USD".to_string(),
        }
    }
}

fn parsed_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    lookup(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    ///
    /// `WEBHOOK_SECRET` must be set and non-empty outside development.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let environment = lookup("ENVIRONMENT").unwrap_or(defaults.environment);

        let webhook_secret = match lookup("WEBHOOK_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ if environment == "development" => defaults.webhook_secret,
            _ => {
                return Err(LedgerError::Config(format!(
                    "WEBHOOK_SECRET must be set in {environment} environment"
                )));
            }
        };

        let config = Self {
            environment,
            webhook_secret,
            webhook_tolerance_secs: parsed_or(&lookup, "WEBHOOK_TOLERANCE_SECS", defaults.webhook_tolerance_secs),
            webhook_max_attempts: parsed_or(&lookup, "WEBHOOK_MAX_ATTEMPTS", defaults.webhook_max_attempts),
            webhook_retry_base: Duration::from_millis(parsed_or(&lookup, "WEBHOOK_RETRY_BASE_MS", 1000)),
            order_cache_ttl: Duration::from_secs(parsed_or(&lookup, "ORDER_CACHE_TTL_SECS", 30)),
            cache_sweep_interval: Duration::from_secs(parsed_or(&lookup, "CACHE_SWEEP_INTERVAL_SECS", 60)),
            payment_ttl: Duration::from_secs(parsed_or(&lookup, "PAYMENT_TTL_SECS", 15 * 60)),
            payment_currency: lookup("PAYMENT_CURRENCY").unwrap_or(defaults.payment_currency),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.webhook_secret.is_empty() {
            return Err(LedgerError::Config("webhook secret must not be empty".to_string()));
        }
        if self.webhook_max_attempts == 0 {
            return Err(LedgerError::Config(
                "webhook_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.cache_sweep_interval.is_zero() {
            return Err(LedgerError::Config(
                "cache_sweep_interval must be positive".to_string(),
            ));
        }
        if self.webhook_tolerance_secs <= 0 {
            return Err(LedgerError::Config(
                "webhook_tolerance_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Payment TTL as a chrono duration, for timestamp arithmetic.
    pub fn payment_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.payment_ttl).unwrap_or(chrono::Duration::minutes(15))
    }
}
