//! Relay and client configuration.

use std::fmt;
use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Environment variable names read by [`RelayConfig::from_env`].
pub const ENV_BIND_ADDR: &str = "CODEROOM_BIND_ADDR";
pub const ENV_OUTBOX_CAPACITY: &str = "CODEROOM_OUTBOX_CAPACITY";
pub const ENV_IDLE_ROOM_TTL_SECS: &str = "CODEROOM_IDLE_ROOM_TTL_SECS";

/// Relay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per connection before a slow peer starts losing them
    pub outbox_capacity: usize,
    /// Evict rooms with no participants after this long without activity.
    /// `None` keeps every room until process exit.
    pub idle_room_ttl: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            outbox_capacity: 256,
            idle_room_ttl: None,
        }
    }
}

impl RelayConfig {
    /// Defaults overlaid with `CODEROOM_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from an arbitrary lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            if addr.trim().is_empty() {
                return Err(ConfigError::invalid(ENV_BIND_ADDR, addr));
            }
            config.bind_addr = addr.trim().to_string();
        }

        if let Some(raw) = lookup(ENV_OUTBOX_CAPACITY) {
            config.outbox_capacity = match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::invalid(ENV_OUTBOX_CAPACITY, raw)),
            };
        }

        if let Some(raw) = lookup(ENV_IDLE_ROOM_TTL_SECS) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::invalid(ENV_IDLE_ROOM_TTL_SECS, raw.clone()))?;
            // 0 disables eviction
            config.idle_room_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }
}

/// Client-side configuration for a code room session.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Relay WebSocket URL
    pub server_url: String,
    /// Reconnect delays
    pub backoff: BackoffPolicy,
    /// Local inactivity after which `isTyping=false` is emitted
    pub typing_idle: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:5000".to_string(),
            backoff: BackoffPolicy::default(),
            typing_idle: Duration::from_millis(1500),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidValue { key: &'static str, value: String },
}

impl ConfigError {
    fn invalid(key: &'static str, value: String) -> Self {
        Self::InvalidValue { key, value }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value } => write!(f, "Invalid value for {key}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:5000");
        assert_eq!(config.outbox_capacity, 256);
        assert!(config.idle_room_ttl.is_none());
    }

    #[test]
    fn test_from_lookup_empty_is_default() {
        let config = RelayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = RelayConfig::from_lookup(lookup(&[
            (ENV_BIND_ADDR, "0.0.0.0:8080"),
            (ENV_OUTBOX_CAPACITY, "64"),
            (ENV_IDLE_ROOM_TTL_SECS, "600"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.outbox_capacity, 64);
        assert_eq!(config.idle_room_ttl, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_zero_ttl_disables_eviction() {
        let config = RelayConfig::from_lookup(lookup(&[(ENV_IDLE_ROOM_TTL_SECS, "0")])).unwrap();
        assert!(config.idle_room_ttl.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = RelayConfig::from_lookup(lookup(&[(ENV_OUTBOX_CAPACITY, "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: ENV_OUTBOX_CAPACITY,
                value: "lots".into()
            }
        );

        assert!(RelayConfig::from_lookup(lookup(&[(ENV_OUTBOX_CAPACITY, "0")])).is_err());
        assert!(RelayConfig::from_lookup(lookup(&[(ENV_BIND_ADDR, "  ")])).is_err());
        assert!(RelayConfig::from_lookup(lookup(&[(ENV_IDLE_ROOM_TTL_SECS, "-5")])).is_err());
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.typing_idle, Duration::from_millis(1500));
        assert_eq!(config.backoff, BackoffPolicy::default());

        let custom = ClientConfig::new("ws://relay:9000");
        assert_eq!(custom.server_url, "ws://relay:9000");
    }
}
