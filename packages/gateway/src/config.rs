//! Gateway Configuration
//!
//! The recognized configuration envelope. Defaults suit a single-node
//! development deployment; every option can be overridden from the
//! environment with a `PRAETOR_` prefix.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Gateway configuration envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP bind address
    pub bind_addr: String,
    /// Tenant applied when no header resolves one
    pub default_tenant: Option<String>,
    /// API key → tenant mapping for `Authorization: Bearer` resolution
    pub api_keys: HashMap<String, String>,
    /// Remote entropy validator base URL; local analyzer only when unset
    pub entropy_url: Option<String>,
    /// Remote cognitive validator endpoint; local jury when unset
    pub jury_addr: Option<String>,
    /// State cloner / cache backing; recognized but unused by the
    /// in-memory build
    pub redis_addr: Option<String>,
    /// Ghost pool: idle containers kept warm
    pub pool_min_idle: usize,
    /// Ghost pool: hard capacity
    pub pool_max_capacity: usize,
    /// Socket meter: credits per 1 KiB frame
    pub meter_base_cost: f64,
    /// Socket meter: extra risk multipliers merged over the default table
    pub meter_risk_multipliers: HashMap<String, f64>,
    /// Rate limiter: sustained calls per minute (burst is 2x)
    pub rate_limit_max_per_min: u32,
    /// Jitter bounds in milliseconds
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    /// JIT entitlement TTL cap in seconds (hard-capped at one hour)
    pub jit_max_ttl_secs: u64,
    /// How long the pipeline waits for tri-factor convergence
    pub gate_timeout_secs: u64,
    /// How long a call waits for an idle ghost container
    pub pool_get_timeout_secs: u64,
    /// Drain budget on shutdown
    pub drain_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            default_tenant: None,
            api_keys: HashMap::new(),
            entropy_url: None,
            jury_addr: None,
            redis_addr: None,
            pool_min_idle: 2,
            pool_max_capacity: 8,
            meter_base_cost: 0.001,
            meter_risk_multipliers: HashMap::new(),
            rate_limit_max_per_min: 60,
            jitter_min_ms: 5,
            jitter_max_ms: 50,
            jit_max_ttl_secs: 3600,
            gate_timeout_secs: 35,
            pool_get_timeout_secs: 5,
            drain_timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    /// Build a config from defaults plus `PRAETOR_*` environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("PRAETOR_BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Ok(v) = std::env::var("PRAETOR_DEFAULT_TENANT") {
            config.default_tenant = Some(v);
        }
        if let Ok(v) = std::env::var("PRAETOR_ENTROPY_URL") {
            config.entropy_url = Some(v);
        }
        if let Ok(v) = std::env::var("PRAETOR_JURY_ADDR") {
            config.jury_addr = Some(v);
        }
        if let Ok(v) = std::env::var("PRAETOR_REDIS_ADDR") {
            config.redis_addr = Some(v);
        }
        if let Some(v) = env_parse("PRAETOR_POOL_MIN_IDLE") {
            config.pool_min_idle = v;
        }
        if let Some(v) = env_parse("PRAETOR_POOL_MAX_CAPACITY") {
            config.pool_max_capacity = v;
        }
        if let Some(v) = env_parse("PRAETOR_METER_BASE_COST") {
            config.meter_base_cost = v;
        }
        if let Some(v) = env_parse("PRAETOR_RATE_LIMIT_MAX_PER_MIN") {
            config.rate_limit_max_per_min = v;
        }
        if let Some(v) = env_parse("PRAETOR_JITTER_MIN_MS") {
            config.jitter_min_ms = v;
        }
        if let Some(v) = env_parse("PRAETOR_JITTER_MAX_MS") {
            config.jitter_max_ms = v;
        }
        if let Some(v) = env_parse("PRAETOR_JIT_MAX_TTL_SECS") {
            config.jit_max_ttl_secs = v;
        }

        config
    }

    /// Gate convergence deadline.
    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs(self.gate_timeout_secs)
    }

    /// Ghost-pool lease deadline.
    pub fn pool_get_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_get_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.pool_min_idle, 2);
        assert_eq!(config.rate_limit_max_per_min, 60);
        assert_eq!(config.gate_timeout_secs, 35);
        assert!(config.entropy_url.is_none());
    }

    #[test]
    fn test_durations() {
        let config = GatewayConfig::default();
        assert_eq!(config.gate_timeout(), Duration::from_secs(35));
        assert_eq!(config.pool_get_timeout(), Duration::from_secs(5));
    }
}
