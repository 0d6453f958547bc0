//! Hub Configuration Settings
//!
//! Configuration types for the fan-out hub, loaded from environment
//! variables. Everything has a sensible default; the hub starts with no
//! configuration at all.

use std::time::Duration;

/// Listener settings for the subscriber-facing WebSocket endpoint and the
/// operational HTTP endpoint.
#[derive(Debug, Clone)]
pub struct ListenSettings {
    /// Interface to bind.
    pub host: String,
    /// WebSocket port.
    pub port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            health_port: 8082,
        }
    }
}

impl ListenSettings {
    /// The WebSocket bind address as `host:port`.
    #[must_use]
    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Feed production settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Interval between snapshot productions.
    pub tick_interval: Duration,
    /// Number of instruments tracked per snapshot.
    pub instruments: usize,
    /// Capacity of the feed event channel.
    pub events_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            instruments: 10,
            events_capacity: 64,
        }
    }
}

/// Per-connection session settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Capacity of each connection's outbound frame channel. A subscriber
    /// that falls this many frames behind is evicted at the next broadcast.
    pub outbound_capacity: usize,
    /// Bound on the feed status call answering a `status_request`.
    pub status_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            status_timeout: Duration::from_millis(2000),
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Listener settings.
    pub listen: ListenSettings,
    /// Feed production settings.
    pub feed: FeedSettings,
    /// Per-connection session settings.
    pub session: SessionSettings,
}

impl HubConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but invalid in a way a
    /// default cannot paper over (empty host, colliding ports).
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen = ListenSettings {
            host: std::env::var("STREAM_HUB_HOST")
                .unwrap_or_else(|_| ListenSettings::default().host),
            port: parse_env_u16("STREAM_HUB_PORT", ListenSettings::default().port),
            health_port: parse_env_u16(
                "STREAM_HUB_HEALTH_PORT",
                ListenSettings::default().health_port,
            ),
        };

        let feed = FeedSettings {
            tick_interval: parse_env_duration_secs(
                "STREAM_HUB_TICK_INTERVAL_SECS",
                FeedSettings::default().tick_interval,
            ),
            instruments: parse_env_usize(
                "STREAM_HUB_INSTRUMENTS",
                FeedSettings::default().instruments,
            ),
            events_capacity: parse_env_usize(
                "STREAM_HUB_FEED_EVENTS_CAPACITY",
                FeedSettings::default().events_capacity,
            ),
        };

        let session = SessionSettings {
            outbound_capacity: parse_env_usize(
                "STREAM_HUB_OUTBOUND_CAPACITY",
                SessionSettings::default().outbound_capacity,
            ),
            status_timeout: parse_env_duration_millis(
                "STREAM_HUB_STATUS_TIMEOUT_MS",
                SessionSettings::default().status_timeout,
            ),
        };

        let config = Self {
            listen,
            feed,
            session,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty host or colliding listener ports.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.host.is_empty() {
            return Err(ConfigError::EmptyValue("STREAM_HUB_HOST".to_string()));
        }
        if self.listen.port == self.listen.health_port {
            return Err(ConfigError::PortConflict(self.listen.port));
        }
        if self.session.outbound_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("STREAM_HUB_OUTBOUND_CAPACITY"));
        }
        if self.feed.events_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("STREAM_HUB_FEED_EVENTS_CAPACITY"));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Two listeners were configured onto the same port.
    #[error("WebSocket and health ports collide on {0}")]
    PortConflict(u16),
    /// A channel capacity was configured as zero.
    #[error("environment variable {0} must be at least 1")]
    ZeroCapacity(&'static str),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_defaults() {
        let settings = ListenSettings::default();
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.port, 8765);
        assert_eq!(settings.health_port, 8082);
        assert_eq!(settings.ws_addr(), "0.0.0.0:8765");
    }

    #[test]
    fn feed_defaults() {
        let settings = FeedSettings::default();
        assert_eq!(settings.tick_interval, Duration::from_secs(5));
        assert_eq!(settings.instruments, 10);
        assert_eq!(settings.events_capacity, 64);
    }

    #[test]
    fn session_defaults() {
        let settings = SessionSettings::default();
        assert_eq!(settings.outbound_capacity, 256);
        assert_eq!(settings.status_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn default_config_validates() {
        assert!(HubConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_host_is_rejected() {
        let config = HubConfig {
            listen: ListenSettings {
                host: String::new(),
                ..ListenSettings::default()
            },
            ..HubConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn zero_outbound_capacity_is_rejected() {
        let config = HubConfig {
            session: SessionSettings {
                outbound_capacity: 0,
                ..SessionSettings::default()
            },
            ..HubConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroCapacity("STREAM_HUB_OUTBOUND_CAPACITY"))
        ));
    }

    #[test]
    fn colliding_ports_are_rejected() {
        let config = HubConfig {
            listen: ListenSettings {
                health_port: ListenSettings::default().port,
                ..ListenSettings::default()
            },
            ..HubConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PortConflict(8765))
        ));
    }
}
