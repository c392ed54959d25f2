//! Coordinator server implementation
//!
//! This module provides the composition root that wires the registry, the
//! HA supervisor, the failure detector and the HTTP API together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::peer::PeerClient;
use crate::utils::now_millis;

use super::api::create_router;
use super::config::CoordinatorConfig;
use super::detector::FailureDetector;
use super::ha::HaSupervisor;
use super::notifier::BrokerNotifier;
use super::registry::ClusterRegistry;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Broker registry
    pub registry: Arc<ClusterRegistry>,

    /// Membership and leader fan-out
    pub notifier: BrokerNotifier,

    /// Primary/secondary role
    pub ha: Arc<HaSupervisor>,

    /// Staleness sweep
    pub detector: Arc<FailureDetector>,

    /// Server start time
    pub start_time: Instant,

    /// Configuration
    pub config: CoordinatorConfig,
}

// ============================================================================
// Coordinator Server
// ============================================================================

/// Main Coordinator server
pub struct CoordinatorServer {
    config: CoordinatorConfig,
    state: AppState,
}

impl CoordinatorServer {
    /// Create a new coordinator server
    pub fn new(config: CoordinatorConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|e| ServerError::Config(e.to_string()))?;

        let peer = PeerClient::new(config.request_timeout())
            .map_err(|e| ServerError::Init(e.to_string()))?;

        let registry = Arc::new(ClusterRegistry::new());
        let notifier = BrokerNotifier::new(peer.clone());
        let ha = Arc::new(HaSupervisor::new(&config, registry.clone(), peer));
        let detector = Arc::new(FailureDetector::new(
            registry.clone(),
            notifier.clone(),
            ha.clone(),
            config.heartbeat_timeout_millis(),
        ));

        let state = AppState {
            registry,
            notifier,
            ha,
            detector,
            start_time: Instant::now(),
            config: config.clone(),
        };

        Ok(Self { config, state })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        // Add CORS layer if enabled
        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        // Add tracing layer if enabled
        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start with graceful shutdown on the configured address
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.config.bind_address;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{}: {}", addr, e)))?;

        self.serve(listener, shutdown_signal).await
    }

    /// Serve on an already bound listener until `shutdown_signal` resolves
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        tracing::info!(
            addr = %local_addr,
            role = %self.config.role,
            "Starting Coordinator server"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = self.start_background_tasks(shutdown_rx).await;

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()));

        let _ = shutdown_tx.send(true);
        futures::future::join_all(tasks).await;

        tracing::info!("Coordinator server shutdown complete");
        result
    }

    /// Start background tasks
    async fn start_background_tasks(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        // A secondary seeds the primary's record and registers with it
        self.state.ha.bootstrap(now_millis()).await;

        let tasks = vec![
            self.state
                .detector
                .clone()
                .start(self.config.sweep_interval(), shutdown_rx.clone()),
            self.state
                .ha
                .clone()
                .start(self.config.sync_interval(), shutdown_rx),
        ];

        tracing::info!("Background tasks started");
        tasks
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            advertised_url: self.config.advertised_url.clone(),
            role: self.config.role.to_string(),
            peer_url: self.config.peer_url.clone(),
            heartbeat_timeout_ms: self.config.heartbeat_timeout_ms,
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub advertised_url: String,
    pub role: String,
    pub peer_url: Option<String>,
    pub heartbeat_timeout_ms: u64,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Coordinator Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Advertised URL: {}\n\
             Role: {}\n\
             Peer Coordinator: {}\n\
             Heartbeat Timeout: {}ms\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.advertised_url,
            self.role,
            self.peer_url.as_deref().unwrap_or("-"),
            self.heartbeat_timeout_ms,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Failures starting or running a server process
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A client or supervisor could not be constructed
    #[error("Initialization failed: {0}")]
    Init(String),

    #[error("Failed to bind: {0}")]
    Bind(String),

    #[error("Server error: {0}")]
    Serve(String),
}

// ============================================================================
// Tests
// ============================================================================
