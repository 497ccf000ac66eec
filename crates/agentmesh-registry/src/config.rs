// Registry configuration
//
// Read once at startup from the environment (after dotenvy has loaded any
// .env file). Malformed values fail startup instead of falling back silently.

use std::str::FromStr;
use std::time::Duration;

use agentmesh_core::{HealthThresholds, ThresholdPolicy};
use anyhow::{Context, Result};

use crate::monitor::MonitorConfig;
use crate::RouterOptions;
use crate::storage::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub host: String,
    pub port: u16,
    /// `memory`, `sqlite:...` or `postgres://...`
    pub database_url: String,
    pub default_thresholds: HealthThresholds,
    pub health_check_interval: Duration,
    pub expired_grace_period: Duration,
    pub request_timeout: Duration,
    pub storage_max_retries: u32,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            database_url: "memory".to_string(),
            default_thresholds: HealthThresholds::default(),
            health_check_interval: Duration::from_secs(10),
            expired_grace_period: Duration::ZERO,
            request_timeout: Duration::from_secs(10),
            storage_max_retries: 3,
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let timeout = parse_or(&get, "DEFAULT_TIMEOUT_THRESHOLD", defaults.default_thresholds.timeout_threshold)?;
        let eviction = parse_or(&get, "DEFAULT_EVICTION_THRESHOLD", defaults.default_thresholds.eviction_threshold)?;
        let default_thresholds = HealthThresholds::new(timeout, eviction)
            .context("Invalid DEFAULT_TIMEOUT_THRESHOLD / DEFAULT_EVICTION_THRESHOLD")?;

        let health_check_interval = parse_or(&get, "HEALTH_CHECK_INTERVAL", 10u64)?;
        if health_check_interval == 0 {
            anyhow::bail!("HEALTH_CHECK_INTERVAL must be at least 1 second");
        }

        let storage_max_retries: u32 = parse_or(&get, "STORAGE_MAX_RETRIES", defaults.storage_max_retries)?;

        Ok(Self {
            host: get("REGISTRY_HOST").unwrap_or(defaults.host),
            port: parse_or(&get, "REGISTRY_PORT", defaults.port)?,
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            default_thresholds,
            health_check_interval: Duration::from_secs(health_check_interval),
            expired_grace_period: Duration::from_secs(parse_or(&get, "EXPIRED_GRACE_PERIOD", 0u64)?),
            request_timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT", 10u64)?.max(1)),
            storage_max_retries,
            cors_allowed_origins: get("CORS_ALLOWED_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn threshold_policy(&self) -> ThresholdPolicy {
        ThresholdPolicy::new(self.default_thresholds)
    }

    /// `STORAGE_MAX_RETRIES` counts retries, so attempts are one more.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::storage_default()
            .with_max_attempts(self.storage_max_retries.saturating_add(1))
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            request_timeout: Some(self.request_timeout),
            cors_allowed_origins: self.cors_allowed_origins.clone(),
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::default()
            .with_interval(self.health_check_interval)
            .with_expired_grace(self.expired_grace_period)
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
