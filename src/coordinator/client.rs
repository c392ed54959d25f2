//! Coordinator client for brokers
//!
//! Brokers may know several coordinator URLs (primary first). Calls go to
//! the coordinator that last answered and rotate to the next URL when it is
//! unreachable or answers that it is not primary.

use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::models::{join_url, BrokerNode, HeartbeatRequest};

pub const REGISTER_PATH: &str = "/coordinator/register";
pub const HEARTBEAT_PATH: &str = "/coordinator/heartbeat";

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the coordinator client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator URLs in preference order
    pub coordinator_urls: Vec<String>,

    /// Request timeout
    pub timeout: Duration,
}

impl ClientConfig {
    /// Create a new client config
    pub fn new<I, S>(coordinator_urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            coordinator_urls: coordinator_urls.into_iter().map(Into::into).collect(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ============================================================================
// Coordinator Client
// ============================================================================

/// Client for communicating with the coordinator pair
#[derive(Debug)]
pub struct CoordinatorClient {
    config: ClientConfig,
    http_client: Client,
    current: AtomicUsize,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.coordinator_urls.is_empty() {
            return Err(ClientError::InitError(
                "At least one coordinator URL is required".to_string(),
            ));
        }

        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
            current: AtomicUsize::new(0),
        })
    }

    /// Coordinator URL the next call goes to first
    pub fn current_url(&self) -> &str {
        let urls = &self.config.coordinator_urls;
        &urls[self.current.load(Ordering::Relaxed) % urls.len()]
    }

    /// Register a broker and receive the full membership
    pub async fn register(&self, node: &BrokerNode) -> Result<Vec<BrokerNode>, ClientError> {
        let response = self.post_with_failover(REGISTER_PATH, node).await?;
        response
            .json::<Vec<BrokerNode>>()
            .await
            .map_err(|e| ClientError::ParseError(e.to_string()))
    }

    /// Send a heartbeat
    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<(), ClientError> {
        self.post_with_failover(HEARTBEAT_PATH, request).await?;
        Ok(())
    }

    // Internal: POST to each coordinator in turn, starting from the current one
    async fn post_with_failover<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, ClientError> {
        let count = self.config.coordinator_urls.len();
        let start = self.current.load(Ordering::Relaxed);
        let mut last_error = ClientError::CoordinatorUnavailable;

        for offset in 0..count {
            let index = (start + offset) % count;
            let url = join_url(&self.config.coordinator_urls[index], path);

            match self.http_client.post(&url).json(body).send().await {
                Ok(response) if response.status().is_success() => {
                    if index != start % count {
                        tracing::info!(
                            coordinator = %self.config.coordinator_urls[index],
                            "Switched coordinator"
                        );
                    }
                    self.current.store(index, Ordering::Relaxed);
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status();
                    let error = ClientError::HttpError {
                        status: status.as_u16(),
                        message: response.text().await.unwrap_or_default(),
                    };

                    if status.is_client_error() {
                        return Err(error);
                    }

                    if status == StatusCode::SERVICE_UNAVAILABLE {
                        tracing::debug!(url = %url, "Coordinator is not primary");
                    }
                    last_error = error;
                }
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "Coordinator unreachable");
                    last_error = ClientError::NetworkError(e.to_string());
                }
            }
        }

        Err(last_error)
    }
}

// ============================================================================
// Client Errors
// ============================================================================

/// Client errors
#[derive(Debug, Clone)]
pub enum ClientError {
    /// Initialization error
    InitError(String),

    /// Network error
    NetworkError(String),

    /// HTTP error
    HttpError { status: u16, message: String },

    /// Parse error
    ParseError(String),

    /// No coordinator answered
    CoordinatorUnavailable,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitError(msg) => write!(f, "Initialization error: {msg}"),
            Self::NetworkError(msg) => write!(f, "Network error: {msg}"),
            Self::HttpError { status, message } => {
                write!(f, "HTTP error ({status}): {message}")
            }
            Self::ParseError(msg) => write!(f, "Parse error: {msg}"),
            Self::CoordinatorUnavailable => write!(f, "Coordinator unavailable"),
        }
    }
}

impl std::error::Error for ClientError {}

// ============================================================================
// Tests
// ============================================================================
