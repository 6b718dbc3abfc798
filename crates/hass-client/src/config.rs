//! Client configuration

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default time allowed for opening the transport and completing the handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of frames queued toward the writer task
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// How many event handler invocations may run at the same time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchConcurrency {
    /// No limit beyond one in-flight invocation per subscription
    #[default]
    Unbounded,
    /// At most this many invocations across all subscriptions
    Bounded(usize),
}

/// Configuration recognized by the client engine
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-command timeout; `None` waits until the result or connection closure
    pub command_timeout: Option<Duration>,
    /// Limit on concurrent event handler invocations
    pub event_dispatch_concurrency: DispatchConcurrency,
    /// Time allowed for connecting and authenticating
    pub connect_timeout: Duration,
    /// Capacity of the outbound frame queue
    pub outbound_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_timeout: None,
            event_dispatch_concurrency: DispatchConcurrency::Unbounded,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// - `HASS_COMMAND_TIMEOUT`: seconds, or `disabled` / `0`
    /// - `HASS_EVENT_CONCURRENCY`: `unbounded` or a positive integer
    /// - `HASS_CONNECT_TIMEOUT`: seconds
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("HASS_COMMAND_TIMEOUT") {
            config.command_timeout = parse_optional_secs("HASS_COMMAND_TIMEOUT", &value)?;
        }

        if let Some(value) = lookup("HASS_EVENT_CONCURRENCY") {
            config.event_dispatch_concurrency = parse_concurrency(&value)?;
        }

        if let Some(value) = lookup("HASS_CONNECT_TIMEOUT") {
            config.connect_timeout = parse_optional_secs("HASS_CONNECT_TIMEOUT", &value)?
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "HASS_CONNECT_TIMEOUT".to_string(),
                    reason: "connect timeout cannot be disabled".to_string(),
                })?;
        }

        Ok(config)
    }

    /// Set the per-command timeout
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the event handler concurrency limit
    pub fn with_event_dispatch_concurrency(mut self, concurrency: DispatchConcurrency) -> Self {
        self.event_dispatch_concurrency = concurrency;
        self
    }

    /// Set the connect and handshake timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

fn parse_optional_secs(key: &str, value: &str) -> ConfigResult<Option<Duration>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("disabled") {
        return Ok(None);
    }
    let secs: f64 = value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("expected seconds or 'disabled', got '{}'", value),
    })?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("duration must be a non-negative number, got '{}'", value),
        });
    }
    if secs == 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("duration out of range, got '{}'", value),
        })
}

fn parse_concurrency(value: &str) -> ConfigResult<DispatchConcurrency> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("unbounded") {
        return Ok(DispatchConcurrency::Unbounded);
    }
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(DispatchConcurrency::Bounded(n)),
        _ => Err(ConfigError::InvalidValue {
            key: "HASS_EVENT_CONCURRENCY".to_string(),
            reason: format!("expected 'unbounded' or a positive integer, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.command_timeout, None);
        assert_eq!(
            config.event_dispatch_concurrency,
            DispatchConcurrency::Unbounded
        );
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.outbound_buffer, DEFAULT_OUTBOUND_BUFFER);
    }

    #[test]
    fn test_parse_values() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("HASS_COMMAND_TIMEOUT", "2.5"),
            ("HASS_EVENT_CONCURRENCY", "4"),
            ("HASS_CONNECT_TIMEOUT", "30"),
        ]))
        .unwrap();
        assert_eq!(config.command_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(
            config.event_dispatch_concurrency,
            DispatchConcurrency::Bounded(4)
        );
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_disabled_timeout() {
        let config =
            ClientConfig::from_lookup(lookup(&[("HASS_COMMAND_TIMEOUT", "disabled")])).unwrap();
        assert_eq!(config.command_timeout, None);
        let config = ClientConfig::from_lookup(lookup(&[("HASS_COMMAND_TIMEOUT", "0")])).unwrap();
        assert_eq!(config.command_timeout, None);
    }

    #[test]
    fn test_invalid_values() {
        assert!(ClientConfig::from_lookup(lookup(&[("HASS_COMMAND_TIMEOUT", "soon")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("HASS_COMMAND_TIMEOUT", "-1")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("HASS_EVENT_CONCURRENCY", "0")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("HASS_CONNECT_TIMEOUT", "disabled")])).is_err());
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        for key in ["HASS_COMMAND_TIMEOUT", "HASS_CONNECT_TIMEOUT"] {
            match ClientConfig::from_lookup(lookup(&[(key, "1e30")])) {
                Err(ConfigError::InvalidValue { key: bad, .. }) => assert_eq!(bad, key),
                other => panic!("expected InvalidValue for {}, got {:?}", key, other),
            }
        }
    }
}
