//! Configuration module for the coordinator.
//!
//! Structured, env-var-driven configuration, organized by domain: broker,
//! service (HTTP bind, database, timing constants), and observability — each
//! with its own `from_env()`, composed here into one `Config`.

mod broker_config;
mod observability_config;
mod service_config;

pub use broker_config::{AlpacaConfig, BrokerEnvConfig};
pub use observability_config::ObservabilityEnvConfig;
pub use service_config::ServiceEnvConfig;

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerEnvConfig,
    pub service: ServiceEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            broker: BrokerEnvConfig::from_env(),
            service: ServiceEnvConfig::from_env(),
            observability: ObservabilityEnvConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env_defaults() {
        let config = Config::from_env().expect("should parse with defaults");
        assert!(config.broker.alpaca.paper_base_url.contains("alpaca.markets"));
        assert_eq!(config.service.max_reactivation_attempts, 3);
    }
}
