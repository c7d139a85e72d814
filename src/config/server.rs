//! # Probe server settings
//!
//! Port and startup timing of the `/metrics`, `/healthz` and `/readyz`
//! listener. These are read from the environment rather than flags so the
//! same values can be set on the container and referenced by its probes.

use crate::constants::{
    DEFAULT_METRICS_PORT, DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const PORT_ENV: &str = "GATEWAY_OPERATOR_METRICS_PORT";
const READY_TIMEOUT_ENV: &str = "GATEWAY_OPERATOR_PROBE_READY_TIMEOUT_SECS";
const READY_POLL_ENV: &str = "GATEWAY_OPERATOR_PROBE_POLL_INTERVAL_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Port the probe and metrics listener binds on all interfaces
    pub metrics_port: u16,
    /// Startup fails when the listener is not bound within this time
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            ready_timeout: Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS),
            ready_poll_interval: Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the settings from `lookup`; unset or malformed values keep their defaults
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            metrics_port: parsed(&lookup, PORT_ENV).unwrap_or(defaults.metrics_port),
            ready_timeout: parsed(&lookup, READY_TIMEOUT_ENV)
                .map_or(defaults.ready_timeout, Duration::from_secs),
            ready_poll_interval: parsed(&lookup, READY_POLL_ENV)
                .map_or(defaults.ready_poll_interval, Duration::from_millis),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(%key, value = %raw, "Ignoring malformed probe server setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_unset_environment_uses_defaults() {
        assert_eq!(from_pairs(&[]), ServerConfig::default());
        assert_eq!(ServerConfig::default().metrics_port, DEFAULT_METRICS_PORT);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = from_pairs(&[
            (PORT_ENV, "9443"),
            (READY_TIMEOUT_ENV, " 30 "),
            (READY_POLL_ENV, "250"),
        ]);
        assert_eq!(config.metrics_port, 9443);
        assert_eq!(config.ready_timeout, Duration::from_secs(30));
        assert_eq!(config.ready_poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_malformed_value_keeps_default() {
        let config = from_pairs(&[(PORT_ENV, "http"), (READY_POLL_ENV, "-1")]);
        assert_eq!(config.metrics_port, DEFAULT_METRICS_PORT);
        assert_eq!(
            config.ready_poll_interval,
            Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS)
        );
    }
}
