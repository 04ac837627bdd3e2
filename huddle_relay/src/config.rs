//! Server configuration read from the environment

use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

pub const IDLE_TIMEOUT_ENV: &str = "HUDDLE_IDLE_TIMEOUT_SECS";
pub const ANNOUNCE_ENV: &str = "HUDDLE_ANNOUNCE";
pub const STATE_FILE_ENV: &str = "HUDDLE_STATE_FILE";

/// Connections not polled for this long are treated as disconnected
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// When the rest of a room learns about a newcomer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AnnouncePolicy {
    /// After the newcomer has polled its existing-users snapshot and made
    /// another request
    #[default]
    Acknowledged,
    /// Right after the snapshot is queued
    Immediate,
}

impl std::str::FromStr for AnnouncePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "acknowledged" | "ack" => Ok(Self::Acknowledged),
            "immediate" => Ok(Self::Immediate),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub idle_timeout: Duration,
    pub announce: AnnouncePolicy,
    /// Reload and save state around every operation, for runtimes that
    /// create a fresh instance per request
    pub state_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            announce: AnnouncePolicy::default(),
            state_file: None,
        }
    }
}

impl ServerConfig {
    /// Read the configuration from `HUDDLE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(IDLE_TIMEOUT_ENV) {
            let secs = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: IDLE_TIMEOUT_ENV,
                    value: value.clone(),
                })?;
            config.idle_timeout = Duration::from_secs(secs);
        }

        if let Some(value) = lookup(ANNOUNCE_ENV) {
            config.announce = value.parse().map_err(|()| ConfigError::InvalidValue {
                key: ANNOUNCE_ENV,
                value: value.clone(),
            })?;
        }

        config.state_file = lookup(STATE_FILE_ENV)
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        Ok(config)
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
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn reads_all_variables() {
        let config = ServerConfig::from_lookup(lookup(&[
            (IDLE_TIMEOUT_ENV, "15"),
            (ANNOUNCE_ENV, "Immediate"),
            (STATE_FILE_ENV, "/tmp/huddle.json"),
        ]))
        .unwrap();
        assert_eq!(config.idle_timeout, Duration::from_secs(15));
        assert_eq!(config.announce, AnnouncePolicy::Immediate);
        assert_eq!(config.state_file, Some(PathBuf::from("/tmp/huddle.json")));
    }

    #[test]
    fn rejects_bad_timeout() {
        let err = ServerConfig::from_lookup(lookup(&[(IDLE_TIMEOUT_ENV, "soon")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: IDLE_TIMEOUT_ENV, .. }
        ));
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(ServerConfig::from_lookup(lookup(&[(ANNOUNCE_ENV, "later")])).is_err());
    }
}
