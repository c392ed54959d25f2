//! Configuration management for sports-notify
//!
//! This module loads the settings of both process kinds from a TOML file or
//! from environment variables. Command-line flags are applied on top by the
//! binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::broker::config::{parse_url_list, BrokerConfig};
use crate::coordinator::config::{CoordinatorConfig, CoordinatorRole};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator configuration
    pub coordinator: CoordinatorConfig,

    /// Broker configuration
    pub broker: BrokerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_var(key).and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        let coordinator = &mut config.coordinator;
        if let Some(addr) = env_var("COORDINATOR_BIND_ADDRESS") {
            coordinator.bind_address = addr
                .parse()
                .with_context(|| format!("Invalid COORDINATOR_BIND_ADDRESS: {addr}"))?;
            coordinator.advertised_url =
                format!("http://127.0.0.1:{}", coordinator.bind_address.port());
        }
        if let Some(url) = env_var("COORDINATOR_ADVERTISED_URL") {
            coordinator.advertised_url = url;
        }
        if let Some(role) = env_var("COORDINATOR_ROLE") {
            coordinator.role = role
                .parse::<CoordinatorRole>()
                .map_err(|e| anyhow::anyhow!("Invalid COORDINATOR_ROLE: {e}"))?;
        }
        if let Some(url) = env_var("COORDINATOR_PEER_URL") {
            coordinator.peer_url = Some(url);
        }
        if let Some(ms) = env_parse("COORDINATOR_HEARTBEAT_TIMEOUT_MS") {
            coordinator.heartbeat_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("COORDINATOR_SWEEP_INTERVAL_MS") {
            coordinator.sweep_interval_ms = ms;
        }
        if let Some(ms) = env_parse("COORDINATOR_SYNC_INTERVAL_MS") {
            coordinator.sync_interval_ms = ms;
        }

        let broker = &mut config.broker;
        if let Some(urls) = env_var("COORDINATOR_URLS") {
            broker.coordinator_urls = parse_url_list(&urls);
        }
        if let Some(addr) = env_var("BROKER_BIND_ADDRESS") {
            broker.bind_address = addr
                .parse()
                .with_context(|| format!("Invalid BROKER_BIND_ADDRESS: {addr}"))?;
            broker.connection_url = format!("http://127.0.0.1:{}", broker.bind_address.port());
        }
        if let Some(url) = env_var("BROKER_CONNECTION_URL") {
            broker.connection_url = url;
        }
        if let Some(ms) = env_parse("BROKER_HEARTBEAT_INTERVAL_MS") {
            broker.heartbeat_interval_ms = ms;
        }
        if let Some(ms) = env_parse("BROKER_DELIVERY_INTERVAL_MS") {
            broker.delivery_interval_ms = ms;
        }
        if let Some(ms) = env_parse("BROKER_REQUEST_TIMEOUT_MS") {
            broker.request_timeout_ms = ms;
        }

        if let Some(level) = env_var("SPORTS_NOTIFY_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = env_var("SPORTS_NOTIFY_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.coordinator
            .validate()
            .context("Invalid coordinator configuration")?;
        self.broker
            .validate()
            .context("Invalid broker configuration")?;

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json'");
        }

        Ok(())
    }
}
