//! Broker configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

pub use crate::coordinator::config::ConfigError;

/// Default broker port
pub const DEFAULT_BROKER_PORT: u16 = 9001;

/// Configuration for a broker process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// URL peers and the coordinator use to reach this broker
    pub connection_url: String,

    /// Coordinator URLs, primary first
    pub coordinator_urls: Vec<String>,

    /// Heartbeat period in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Pause after a failed heartbeat in milliseconds
    pub heartbeat_backoff_ms: u64,

    /// Delivery loop period in milliseconds
    pub delivery_interval_ms: u64,

    /// Bound for each outbound call in milliseconds
    pub request_timeout_ms: u64,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_BROKER_PORT)),
            connection_url: format!("http://127.0.0.1:{}", DEFAULT_BROKER_PORT),
            coordinator_urls: vec!["http://127.0.0.1:8080".to_string()],
            heartbeat_interval_ms: 3_000,
            heartbeat_backoff_ms: 5_000,
            delivery_interval_ms: 1_000,
            request_timeout_ms: 5_000,
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

impl BrokerConfig {
    /// Create a new config builder
    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder::default()
    }

    /// Load configuration from environment variables
    ///
    /// `COORDINATOR_URLS` is a comma-separated list and is required; every
    /// other variable falls back to its default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let coordinator_urls = env::var("COORDINATOR_URLS")
            .map_err(|_| ConfigError::MissingField {
                field: "COORDINATOR_URLS".to_string(),
            })
            .map(|s| parse_url_list(&s))?;

        let mut builder = Self::builder().coordinator_urls(coordinator_urls);

        if let Ok(addr) = env::var("BROKER_BIND_ADDRESS") {
            builder = builder.bind_address_str(&addr)?;
        }
        if let Ok(url) = env::var("BROKER_CONNECTION_URL") {
            builder = builder.connection_url(url);
        }
        if let Some(ms) = env_millis("BROKER_HEARTBEAT_INTERVAL_MS") {
            builder = builder.heartbeat_interval_ms(ms);
        }
        if let Some(ms) = env_millis("BROKER_DELIVERY_INTERVAL_MS") {
            builder = builder.delivery_interval_ms(ms);
        }
        if let Some(ms) = env_millis("BROKER_REQUEST_TIMEOUT_MS") {
            builder = builder.request_timeout_ms(ms);
        }

        builder.build()
    }

    pub fn port(&self) -> u16 {
        self.bind_address.port()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_backoff(&self) -> Duration {
        Duration::from_millis(self.heartbeat_backoff_ms)
    }

    pub fn delivery_interval(&self) -> Duration {
        Duration::from_millis(self.delivery_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordinator_urls.iter().all(|u| u.trim().is_empty()) {
            return Err(ConfigError::MissingField {
                field: "coordinator_urls".to_string(),
            });
        }

        if self.connection_url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "connection_url".to_string(),
            });
        }

        for (field, value) in [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_backoff_ms", self.heartbeat_backoff_ms),
            ("delivery_interval_ms", self.delivery_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "Must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn env_millis(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Split a comma-separated URL list, dropping blanks
pub fn parse_url_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builder for BrokerConfig
#[derive(Debug, Default)]
pub struct BrokerConfigBuilder {
    bind_address: Option<SocketAddr>,
    connection_url: Option<String>,
    coordinator_urls: Option<Vec<String>>,
    heartbeat_interval_ms: Option<u64>,
    heartbeat_backoff_ms: Option<u64>,
    delivery_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    enable_cors: Option<bool>,
    enable_request_logging: Option<bool>,
}

impl BrokerConfigBuilder {
    /// Set bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set bind address from string
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_address = Some(addr.parse().map_err(|_| ConfigError::InvalidValue {
            field: "bind_address".to_string(),
            reason: format!("Invalid address: {}", addr),
        })?);
        Ok(self)
    }

    pub fn connection_url(mut self, url: impl Into<String>) -> Self {
        self.connection_url = Some(url.into());
        self
    }

    pub fn coordinator_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.coordinator_urls = Some(urls.into_iter().map(Into::into).collect());
        self
    }

    pub fn heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = Some(ms);
        self
    }

    pub fn heartbeat_backoff_ms(mut self, ms: u64) -> Self {
        self.heartbeat_backoff_ms = Some(ms);
        self
    }

    pub fn delivery_interval_ms(mut self, ms: u64) -> Self {
        self.delivery_interval_ms = Some(ms);
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    /// Enable/disable CORS
    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = Some(enable);
        self
    }

    /// Enable/disable request logging
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Build the config
    ///
    /// The connection URL defaults to loopback on the bind port.
    pub fn build(self) -> Result<BrokerConfig, ConfigError> {
        let defaults = BrokerConfig::default();
        let bind_address = self.bind_address.unwrap_or(defaults.bind_address);

        let config = BrokerConfig {
            bind_address,
            connection_url: self
                .connection_url
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", bind_address.port())),
            coordinator_urls: self.coordinator_urls.unwrap_or(defaults.coordinator_urls),
            heartbeat_interval_ms: self
                .heartbeat_interval_ms
                .unwrap_or(defaults.heartbeat_interval_ms),
            heartbeat_backoff_ms: self
                .heartbeat_backoff_ms
                .unwrap_or(defaults.heartbeat_backoff_ms),
            delivery_interval_ms: self
                .delivery_interval_ms
                .unwrap_or(defaults.delivery_interval_ms),
            request_timeout_ms: self.request_timeout_ms.unwrap_or(defaults.request_timeout_ms),
            enable_cors: self.enable_cors.unwrap_or(defaults.enable_cors),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
        };

        config.validate()?;
        Ok(config)
    }
}
