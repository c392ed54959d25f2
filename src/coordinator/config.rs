//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Default coordinator port
pub const DEFAULT_COORDINATOR_PORT: u16 = 8080;

/// Role a coordinator starts in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorRole {
    #[default]
    Primary,
    Secondary,
}

impl CoordinatorRole {
    pub fn is_primary(self) -> bool {
        matches!(self, Self::Primary)
    }
}

impl FromStr for CoordinatorRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(ConfigError::InvalidValue {
                field: "role".to_string(),
                reason: format!("Expected 'primary' or 'secondary', got '{}'", other),
            }),
        }
    }
}

impl std::fmt::Display for CoordinatorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Configuration for the Coordinator server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// URL other processes use to reach this coordinator
    pub advertised_url: String,

    /// Starting role
    pub role: CoordinatorRole,

    /// Primary coordinator URL (required when starting as secondary)
    pub peer_url: Option<String>,

    /// Broker heartbeat timeout in milliseconds
    pub heartbeat_timeout_ms: u64,

    /// Failure detector period in milliseconds
    pub sweep_interval_ms: u64,

    /// Primary to secondary heartbeat and sync period in milliseconds
    pub sync_interval_ms: u64,

    /// Bound for each outbound call in milliseconds
    pub request_timeout_ms: u64,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_COORDINATOR_PORT)),
            advertised_url: format!("http://127.0.0.1:{}", DEFAULT_COORDINATOR_PORT),
            role: CoordinatorRole::Primary,
            peer_url: None,
            heartbeat_timeout_ms: 5_000,
            sweep_interval_ms: 3_000,
            sync_interval_ms: 3_000,
            request_timeout_ms: 5_000,
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

impl CoordinatorConfig {
    /// Create a new config builder
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Heartbeat timeout as signed millis, for comparing clock readings
    pub fn heartbeat_timeout_millis(&self) -> i64 {
        i64::try_from(self.heartbeat_timeout_ms).unwrap_or(i64::MAX)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("sync_interval_ms", self.sync_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "Must be greater than zero".to_string(),
                });
            }
        }

        if self.heartbeat_timeout_ms <= self.sweep_interval_ms {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_timeout_ms".to_string(),
                reason: "Timeout must be greater than the sweep interval".to_string(),
            });
        }

        if self.advertised_url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "advertised_url".to_string(),
            });
        }

        let has_peer = self.peer_url.as_deref().is_some_and(|u| !u.trim().is_empty());
        if self.role == CoordinatorRole::Secondary && !has_peer {
            return Err(ConfigError::MissingField {
                field: "peer_url".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for CoordinatorConfig
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    bind_address: Option<SocketAddr>,
    advertised_url: Option<String>,
    role: Option<CoordinatorRole>,
    peer_url: Option<String>,
    heartbeat_timeout_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
    sync_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    enable_cors: Option<bool>,
    enable_request_logging: Option<bool>,
}

impl CoordinatorConfigBuilder {
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

    pub fn advertised_url(mut self, url: impl Into<String>) -> Self {
        self.advertised_url = Some(url.into());
        self
    }

    pub fn role(mut self, role: CoordinatorRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Set the primary coordinator URL a secondary monitors
    pub fn peer_url(mut self, url: impl Into<String>) -> Self {
        self.peer_url = Some(url.into());
        self
    }

    pub fn heartbeat_timeout_ms(mut self, ms: u64) -> Self {
        self.heartbeat_timeout_ms = Some(ms);
        self
    }

    pub fn sweep_interval_ms(mut self, ms: u64) -> Self {
        self.sweep_interval_ms = Some(ms);
        self
    }

    pub fn sync_interval_ms(mut self, ms: u64) -> Self {
        self.sync_interval_ms = Some(ms);
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
    /// The advertised URL defaults to loopback on the bind port.
    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        let defaults = CoordinatorConfig::default();
        let bind_address = self.bind_address.unwrap_or(defaults.bind_address);

        let config = CoordinatorConfig {
            bind_address,
            advertised_url: self
                .advertised_url
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", bind_address.port())),
            role: self.role.unwrap_or(defaults.role),
            peer_url: self.peer_url,
            heartbeat_timeout_ms: self
                .heartbeat_timeout_ms
                .unwrap_or(defaults.heartbeat_timeout_ms),
            sweep_interval_ms: self.sweep_interval_ms.unwrap_or(defaults.sweep_interval_ms),
            sync_interval_ms: self.sync_interval_ms.unwrap_or(defaults.sync_interval_ms),
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

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
    MissingField { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            Self::MissingField { field } => {
                write!(f, "Missing required field: {}", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
