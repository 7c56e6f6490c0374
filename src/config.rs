//! Environment-driven configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Server and liveness settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    /// Server identity reported in the welcome event
    pub server_name: String,
    /// How often every connection is pinged
    pub heartbeat_interval: Duration,
    /// How often stale connections are evicted
    pub eviction_interval: Duration,
    /// Maximum age of `last_liveness` before a connection counts as dead
    pub stale_after: Duration,
    /// Upper bound on graceful shutdown before the process exits anyway
    pub shutdown_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
            server_name: "scanrelay".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            eviction_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl RelayConfig {
    /// Load config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("RELAY_HOST")
            .ok()
            .and_then(|v| match v.trim().parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    tracing::warn!("Ignoring invalid RELAY_HOST={:?}", v);
                    None
                }
            })
            .unwrap_or(defaults.bind_addr.ip());
        let port = env_parse::<u16>("PORT").unwrap_or(defaults.bind_addr.port());

        let server_name = std::env::var("RELAY_SERVER_NAME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.server_name);

        Self {
            bind_addr: SocketAddr::new(host, port),
            server_name,
            heartbeat_interval: env_secs("HEARTBEAT_INTERVAL_SECS")
                .unwrap_or(defaults.heartbeat_interval),
            eviction_interval: env_secs("EVICTION_INTERVAL_SECS")
                .unwrap_or(defaults.eviction_interval),
            stale_after: env_secs("STALE_AFTER_SECS").unwrap_or(defaults.stale_after),
            shutdown_timeout: env_secs("SHUTDOWN_TIMEOUT_SECS")
                .unwrap_or(defaults.shutdown_timeout),
        }
    }
}

/// Settings for the simulated authorization provider
#[derive(Debug, Clone)]
pub struct AuthorizerConfig {
    /// Simulated provider latency
    pub delay: Duration,
    /// Probability (0..=1) that a valid request is approved
    pub approval_rate: f64,
    /// Requests above this amount are always declined
    pub max_amount: Option<f64>,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(2000),
            approval_rate: 0.9,
            max_amount: None,
        }
    }
}

impl AuthorizerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let delay = env_parse::<u64>("AUTH_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.delay);

        let approval_rate = env_parse::<f64>("AUTH_APPROVAL_RATE")
            .filter(|r| r.is_finite())
            .map(|r| r.clamp(0.0, 1.0))
            .unwrap_or(defaults.approval_rate);

        let max_amount = env_parse::<f64>("AUTH_MAX_AMOUNT").filter(|m| m.is_finite() && *m > 0.0);

        Self {
            delay,
            approval_rate,
            max_amount,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}, using default", key, raw);
            None
        }
    }
}

/// Non-zero whole seconds
fn env_secs(key: &str) -> Option<Duration> {
    match env_parse::<u64>(key)? {
        0 => {
            tracing::warn!("{} must be greater than zero, using default", key);
            None
        }
        secs => Some(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const RELAY_VARS: &[&str] = &[
        "RELAY_HOST",
        "PORT",
        "RELAY_SERVER_NAME",
        "HEARTBEAT_INTERVAL_SECS",
        "EVICTION_INTERVAL_SECS",
        "STALE_AFTER_SECS",
        "SHUTDOWN_TIMEOUT_SECS",
        "AUTH_DELAY_MS",
        "AUTH_APPROVAL_RATE",
        "AUTH_MAX_AMOUNT",
    ];

    fn clear_env() {
        for var in RELAY_VARS {
            std::env::remove_var(var);
        }
    }

    fn set_env(key: &str, value: &str) {
        std::env::set_var(key, value);
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear_env();
        let config = RelayConfig::from_env();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.server_name, "scanrelay");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.eviction_interval, Duration::from_secs(60));
        assert_eq!(config.stale_after, Duration::from_secs(120));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));

        let auth = AuthorizerConfig::from_env();
        assert_eq!(auth.delay, Duration::from_millis(2000));
        assert_eq!(auth.approval_rate, 0.9);
        assert!(auth.max_amount.is_none());
    }

    #[test]
    #[serial]
    fn test_overrides_from_env() {
        clear_env();
        set_env("RELAY_HOST", "127.0.0.1");
        set_env("PORT", "9001");
        set_env("RELAY_SERVER_NAME", "  checkout-relay ");
        set_env("HEARTBEAT_INTERVAL_SECS", "5");
        set_env("STALE_AFTER_SECS", "15");
        set_env("AUTH_APPROVAL_RATE", "1.7");
        set_env("AUTH_MAX_AMOUNT", "250");

        let config = RelayConfig::from_env();
        assert_eq!(config.bind_addr, "127.0.0.1:9001".parse::<SocketAddr>().unwrap());
        assert_eq!(config.server_name, "checkout-relay");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.stale_after, Duration::from_secs(15));
        assert_eq!(config.eviction_interval, Duration::from_secs(60));

        let auth = AuthorizerConfig::from_env();
        assert_eq!(auth.approval_rate, 1.0);
        assert_eq!(auth.max_amount, Some(250.0));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back_to_defaults() {
        clear_env();
        set_env("PORT", "not-a-port");
        set_env("HEARTBEAT_INTERVAL_SECS", "0");
        set_env("RELAY_HOST", "localhost:80");
        set_env("AUTH_DELAY_MS", "-1");

        let config = RelayConfig::from_env();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.bind_addr.ip().is_unspecified());
        assert_eq!(
            AuthorizerConfig::from_env().delay,
            Duration::from_millis(2000)
        );
        clear_env();
    }
}
