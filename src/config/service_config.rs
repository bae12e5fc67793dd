//! Coordinator-specific environment configuration: HTTP bind address,
//! database location, service-to-service auth, and the timing constants
//! named throughout the component design (stale threshold, debate rounds,
//! sweep/schedule windows).

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServiceEnvConfig {
    pub bind_address: String,
    pub database_url: String,
    /// Pre-shared bearer token trusted as a service-to-service caller.
    pub service_bearer_token: String,
    /// Nominal stale threshold for C7 (open question resolved to 3.5 minutes
    /// in DESIGN.md).
    pub stale_threshold: Duration,
    /// Hard cap on automatic reactivation attempts before C7 gives up.
    pub max_reactivation_attempts: u32,
    /// Role-default debate-round bound used when a user's quota does not
    /// specify a tighter one.
    pub default_max_debate_rounds: u32,
    pub stale_sweep_interval: Duration,
    pub schedule_poll_interval: Duration,
    pub schedule_window_ahead: Duration,
    pub schedule_grace: Duration,
    pub broker_poll_interval: Duration,
    pub broker_poll_timeout: Duration,
    pub max_parallel_rebalance_fanout: usize,
    pub role_sweep_interval: Duration,
}

impl Default for ServiceEnvConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            database_url: "sqlite://deskflow.db".to_string(),
            service_bearer_token: String::new(),
            stale_threshold: Duration::from_secs(210),
            max_reactivation_attempts: 3,
            default_max_debate_rounds: 2,
            stale_sweep_interval: Duration::from_secs(60),
            schedule_poll_interval: Duration::from_secs(60),
            schedule_window_ahead: Duration::from_secs(35 * 60),
            schedule_grace: Duration::from_secs(5 * 60),
            broker_poll_interval: Duration::from_secs(5),
            broker_poll_timeout: Duration::from_secs(60),
            max_parallel_rebalance_fanout: 8,
            role_sweep_interval: Duration::from_secs(300),
        }
    }
}

impl ServiceEnvConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env::var("SERVICE_BIND_ADDRESS").unwrap_or(defaults.bind_address),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            service_bearer_token: env::var("SERVICE_BEARER_TOKEN").unwrap_or_default(),
            stale_threshold: env_secs("STALE_THRESHOLD_SECS", defaults.stale_threshold),
            max_reactivation_attempts: env_u32(
                "MAX_REACTIVATION_ATTEMPTS",
                defaults.max_reactivation_attempts,
            ),
            default_max_debate_rounds: env_u32(
                "DEFAULT_MAX_DEBATE_ROUNDS",
                defaults.default_max_debate_rounds,
            ),
            stale_sweep_interval: env_secs("STALE_SWEEP_INTERVAL_SECS", defaults.stale_sweep_interval),
            schedule_poll_interval: env_secs(
                "SCHEDULE_POLL_INTERVAL_SECS",
                defaults.schedule_poll_interval,
            ),
            schedule_window_ahead: env_secs(
                "SCHEDULE_WINDOW_AHEAD_SECS",
                defaults.schedule_window_ahead,
            ),
            schedule_grace: env_secs("SCHEDULE_GRACE_SECS", defaults.schedule_grace),
            broker_poll_interval: env_secs("BROKER_POLL_INTERVAL_SECS", defaults.broker_poll_interval),
            broker_poll_timeout: env_secs("BROKER_POLL_TIMEOUT_SECS", defaults.broker_poll_timeout),
            max_parallel_rebalance_fanout: env_u32(
                "MAX_PARALLEL_REBALANCE_FANOUT",
                defaults.max_parallel_rebalance_fanout as u32,
            ) as usize,
            role_sweep_interval: env_secs("ROLE_SWEEP_INTERVAL_SECS", defaults.role_sweep_interval),
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse::<u32>().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_notes() {
        let config = ServiceEnvConfig::default();
        assert_eq!(config.stale_threshold, Duration::from_secs(210));
        assert_eq!(config.max_reactivation_attempts, 3);
        assert_eq!(config.default_max_debate_rounds, 2);
        assert_eq!(config.broker_poll_timeout, Duration::from_secs(60));
    }
}
