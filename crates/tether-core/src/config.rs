use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::relay::DEFAULT_RELAY_SERVERS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Diagnostic label for log output.
    pub name: String,
    /// Secret the identity is derived from.
    pub seed: String,
    /// Number of parallel relay connections.
    pub replication_count: usize,
    pub debug: bool,
    pub relay_servers: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "tether".to_string(),
            seed: String::new(),
            replication_count: 1,
            debug: false,
            relay_servers: DEFAULT_RELAY_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("name", &self.name)
            .field("seed", &"<redacted>")
            .field("replication_count", &self.replication_count)
            .field("debug", &self.debug)
            .field("relay_servers", &self.relay_servers)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(name: impl Into<String>, seed: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seed: seed.into(),
            ..Self::default()
        }
    }

    pub fn with_replication_count(mut self, count: usize) -> Self {
        self.replication_count = count;
        self
    }

    pub fn with_relay_servers(mut self, servers: Vec<String>) -> Self {
        self.relay_servers = servers;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Defaults overridden by `TETHER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(name) = lookup("TETHER_NAME") {
            config.name = name;
        }

        if let Some(seed) = lookup("TETHER_SEED") {
            config.seed = seed;
        }

        if let Some(count) = lookup("TETHER_REPLICATION_COUNT") {
            config.replication_count = count.trim().parse().map_err(|e| ConfigError::Env {
                var: "TETHER_REPLICATION_COUNT",
                reason: format!("{e}"),
            })?;
        }

        if let Some(debug) = lookup("TETHER_DEBUG") {
            config.debug = match debug.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(ConfigError::Env {
                        var: "TETHER_DEBUG",
                        reason: format!("not a boolean: {other}"),
                    })
                }
            };
        }

        if let Some(servers) = lookup("TETHER_RELAY_SERVERS") {
            config.relay_servers = servers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replication_count == 0 {
            return Err(ConfigError::Invalid("replication_count must be >= 1".into()));
        }

        if self.seed.is_empty() {
            return Err(ConfigError::Invalid("seed must not be empty".into()));
        }

        if self.relay_servers.is_empty() {
            return Err(ConfigError::Invalid("relay_servers must not be empty".into()));
        }

        Ok(())
    }
}
