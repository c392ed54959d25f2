//! Outbound HTTP to cluster peers
//!
//! Every call between cluster members goes through [`PeerClient`]. Two styles
//! are offered:
//!
//! - awaited calls ([`PeerClient::send_json`]) for paths that need the answer,
//!   such as registration or delivery to a subscriber;
//! - fire-and-forget dispatch ([`PeerClient::dispatch`]) for replication and
//!   membership fan-out. Each dispatch runs on its own task with the client's
//!   bounded timeout, so one unreachable peer never delays the caller or the
//!   other destinations.

use reqwest::{Client, Method, Response};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::metrics;

/// Default bound for a single peer call
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors talking to a cluster peer
#[derive(Error, Debug)]
pub enum PeerError {
    /// HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Init(String),

    /// Connection or transport failure
    #[error("Request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Peer did not answer within the timeout
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// Peer answered with a non-success status
    #[error("Peer {url} answered with status {status}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// Request body could not be encoded
    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PeerError {
    /// HTTP status returned by the peer, if it answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Body of a non-success answer, empty when it could not be read
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    async fn from_response(url: &str, response: Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Self::Status {
            url: url.to_string(),
            status,
            body,
        }
    }

    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

/// HTTP client shared by every outbound peer call of a process
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: Client,
    timeout: Duration,
}

impl PeerClient {
    /// Create a client whose every request is bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self, PeerError> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| PeerError::Init(e.to_string()))?;

        Ok(Self { http, timeout })
    }

    /// Request timeout applied to every call
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a JSON body and require a 2xx answer
    pub async fn send_json<T>(
        &self,
        method: Method,
        url: &str,
        body: &T,
    ) -> Result<Response, PeerError>
    where
        T: Serialize + ?Sized,
    {
        let response = self
            .http
            .request(method, url)
            .json(body)
            .send()
            .await
            .map_err(|e| PeerError::from_reqwest(url, e))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(PeerError::from_response(url, response).await)
        }
    }

    /// POST a JSON body and require a 2xx answer
    pub async fn post_json<T>(&self, url: &str, body: &T) -> Result<Response, PeerError>
    where
        T: Serialize + ?Sized,
    {
        self.send_json(Method::POST, url, body).await
    }

    /// POST without a body and require a 2xx answer
    pub async fn post_empty(&self, url: &str) -> Result<Response, PeerError> {
        let response = self
            .http
            .post(url)
            .send()
            .await
            .map_err(|e| PeerError::from_reqwest(url, e))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(PeerError::from_response(url, response).await)
        }
    }

    /// Fire-and-forget call
    ///
    /// The body is encoded up front so the spawned task owns it. Failures are
    /// logged with `kind` and the destination, counted, and never retried. The
    /// returned handle resolves to `true` on a 2xx answer; callers are free to
    /// drop it.
    pub fn dispatch<T>(
        &self,
        method: Method,
        url: impl Into<String>,
        body: &T,
        kind: &'static str,
    ) -> Option<JoinHandle<bool>>
    where
        T: Serialize + ?Sized,
    {
        let url = url.into();
        let payload = match serde_json::to_value(body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(
                    kind = kind,
                    url = %url,
                    error = %e,
                    "Failed to encode peer payload"
                );
                metrics::record_dispatch_failure(kind);
                return None;
            }
        };

        let client = self.clone();
        Some(tokio::spawn(async move {
            match client.send_json(method, &url, &payload).await {
                Ok(_) => {
                    tracing::debug!(kind = kind, url = %url, "Peer call delivered");
                    true
                }
                Err(e) => {
                    tracing::warn!(kind = kind, url = %url, error = %e, "Peer call failed");
                    metrics::record_dispatch_failure(kind);
                    false
                }
            }
        }))
    }
}

/// Wait for every dispatch and count the successful ones
pub async fn settle(handles: Vec<JoinHandle<bool>>) -> usize {
    let results = futures::future::join_all(handles).await;
    results
        .into_iter()
        .filter(|r| matches!(r, Ok(true)))
        .count()
}
