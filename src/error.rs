//! Unified error handling for the sports-notify crate
//!
//! Each module keeps its own error type. This module wraps them in a single
//! [`Error`] so they can cross module boundaries, classifies them with
//! [`ErrorCategory`], and maps them onto HTTP answers for both servers.
//!
//! # Architecture
//!
//! - [`ClusterErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//! - [`ErrorResponse`] - JSON body returned for a failed request

use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub use crate::broker::error::BrokerError;
pub use crate::coordinator::client::ClientError;
pub use crate::coordinator::config::ConfigError;
pub use crate::coordinator::ha::HaError;
pub use crate::peer::PeerError;

/// Common trait for all cluster error types
pub trait ClusterErrorTrait: std::error::Error {
    /// Check if this error is recoverable (a later attempt may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or malformed input
    Validation,
    /// Caller is not recognized
    Authorization,
    /// Request reached a node that does not own the operation
    Routing,
    /// Request loses to newer cluster state
    Conflict,
    /// Peer unreachable, timed out or failed
    Network,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::Routing => "routing",
            Self::Conflict => "conflict",
            Self::Network => "network",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ClusterErrorTrait for BrokerError {
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotLeader { .. })
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::UnknownSubscriber(_) => ErrorCategory::Authorization,
            Self::NotLeader { .. } => ErrorCategory::Routing,
            Self::NotFollower => ErrorCategory::Conflict,
        }
    }
}

impl ClusterErrorTrait for HaError {
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotPrimary { .. })
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::NotPrimary { .. } => ErrorCategory::Routing,
            Self::StaleEpoch { .. } => ErrorCategory::Conflict,
            Self::InvalidUrl(_) => ErrorCategory::Validation,
        }
    }
}

impl ClusterErrorTrait for PeerError {
    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Init(_) | Self::Encode(_))
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Init(_) => ErrorCategory::Config,
            Self::Encode(_) => ErrorCategory::Other,
            _ => ErrorCategory::Network,
        }
    }
}

impl ClusterErrorTrait for ClientError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::InitError(_) | Self::ParseError(_) => false,
            Self::HttpError { status, .. } => *status >= 500,
            Self::NetworkError(_) | Self::CoordinatorUnavailable => true,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InitError(_) => ErrorCategory::Config,
            Self::ParseError(_) => ErrorCategory::Other,
            _ => ErrorCategory::Network,
        }
    }
}

/// Unified error type for the sports-notify crate
#[derive(Error, Debug)]
pub enum Error {
    /// Broker pub/sub errors
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Coordinator role and epoch errors
    #[error("Coordinator error: {0}")]
    Ha(#[from] HaError),

    /// Outbound peer call errors
    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    /// Broker to coordinator client errors
    #[error("Coordinator client error: {0}")]
    Client(#[from] ClientError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ClusterErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Broker(e) => e.is_recoverable(),
            Self::Ha(e) => e.is_recoverable(),
            Self::Peer(e) => e.is_recoverable(),
            Self::Client(e) => e.is_recoverable(),
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Broker(e) => e.category(),
            Self::Ha(e) => e.category(),
            Self::Peer(e) => e.category(),
            Self::Client(e) => e.category(),
            Self::Io(_) => ErrorCategory::Network,
            Self::Json(_) => ErrorCategory::Validation,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// HTTP status this error is answered with
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Broker(BrokerError::NotLeader { .. }) => StatusCode::MISDIRECTED_REQUEST,
            Self::Ha(HaError::NotPrimary { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            _ => match self.category() {
                ErrorCategory::Validation => StatusCode::BAD_REQUEST,
                ErrorCategory::Authorization => StatusCode::FORBIDDEN,
                ErrorCategory::Conflict => StatusCode::CONFLICT,
                ErrorCategory::Network => StatusCode::BAD_GATEWAY,
                ErrorCategory::Routing => StatusCode::SERVICE_UNAVAILABLE,
                ErrorCategory::Config | ErrorCategory::Other => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Epoch of the coordinator that refused a stale peer push
    pub fn current_epoch(&self) -> Option<u64> {
        match self {
            Self::Ha(HaError::StaleEpoch { current, .. }) => Some(*current),
            _ => None,
        }
    }

    /// Node the caller should retry against, when known
    pub fn redirect_url(&self) -> Option<&str> {
        match self {
            Self::Broker(BrokerError::NotLeader { leader_url }) => leader_url.as_deref(),
            Self::Ha(HaError::NotPrimary { primary_url }) => primary_url.as_deref(),
            _ => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// JSON body of a failed request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub category: ErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_epoch: Option<u64>,
}

impl Serialize for ErrorCategory {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        Self {
            success: false,
            error: err.to_string(),
            category: err.category(),
            redirect_url: err.redirect_url().map(str::to_string),
            current_epoch: err.current_epoch(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
