//! Broker server implementation
//!
//! Composition root of a broker process: pub/sub state, membership,
//! replication, the delivery loop and the coordinator runtime, exposed
//! through the broker HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::coordinator::client::{ClientConfig, CoordinatorClient};
use crate::models::BrokerNode;
use crate::peer::PeerClient;
use crate::utils::random_broker_id;

use super::api::create_router;
use super::config::BrokerConfig;
use super::delivery::DeliveryLoop;
use super::membership::Membership;
use super::replication::Replicator;
use super::runtime::BrokerRuntime;
use super::service::BrokerService;
use super::state::PubSubState;

pub use crate::coordinator::server::ServerError;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Role-gated pub/sub operations
    pub service: BrokerService,

    /// Coordinator registration, heartbeats and push handling
    pub runtime: Arc<BrokerRuntime>,

    /// Server start time
    pub start_time: Instant,

    /// Configuration
    pub config: BrokerConfig,
}

// ============================================================================
// Broker Server
// ============================================================================

/// Main Broker server
pub struct BrokerServer {
    config: BrokerConfig,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
}

impl BrokerServer {
    /// Create a broker with a random id
    pub fn new(config: BrokerConfig) -> Result<Self, ServerError> {
        Self::with_id(config, random_broker_id())
    }

    /// Create a broker with a fixed id
    pub fn with_id(config: BrokerConfig, id: i32) -> Result<Self, ServerError> {
        config.validate().map_err(|e| ServerError::Config(e.to_string()))?;

        let peer = PeerClient::new(config.request_timeout())
            .map_err(|e| ServerError::Init(e.to_string()))?;
        let client = CoordinatorClient::new(
            ClientConfig::new(config.coordinator_urls.clone())
                .with_timeout(config.request_timeout()),
        )
        .map_err(|e| ServerError::Init(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let node = BrokerNode::new(id, config.connection_url.clone(), config.port());
        let membership = Arc::new(Membership::new(node));
        let state = Arc::new(PubSubState::new());
        let replicator = Replicator::new(peer.clone(), membership.clone(), state.clone());

        let delivery = Arc::new(DeliveryLoop::new(
            state.clone(),
            membership.clone(),
            replicator.clone(),
            peer,
            config.delivery_interval(),
            shutdown_rx,
        ));
        let runtime = Arc::new(BrokerRuntime::new(
            membership.clone(),
            client,
            delivery,
            config.heartbeat_interval(),
            config.heartbeat_backoff(),
        ));

        let state = AppState {
            service: BrokerService::new(state, membership, replicator),
            runtime,
            start_time: Instant::now(),
            config: config.clone(),
        };

        Ok(Self {
            config,
            state,
            shutdown_tx,
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// This broker's id
    pub fn id(&self) -> i32 {
        self.state.runtime.membership().id()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

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
    ///
    /// Registration starts once the listener is bound, so the coordinator's
    /// first push can already be answered.
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
            broker_id = self.id(),
            connection_url = %self.config.connection_url,
            "Starting Broker server"
        );

        let runtime_task = self
            .state
            .runtime
            .clone()
            .start(self.shutdown_tx.subscribe());

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()));

        let _ = self.shutdown_tx.send(true);
        let _ = runtime_task.await;

        tracing::info!(broker_id = self.id(), "Broker server shutdown complete");
        result
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            id: self.id(),
            bind_address: self.config.bind_address,
            connection_url: self.config.connection_url.clone(),
            coordinator_urls: self.config.coordinator_urls.clone(),
            delivery_interval_ms: self.config.delivery_interval_ms,
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub id: i32,
    pub bind_address: SocketAddr,
    pub connection_url: String,
    pub coordinator_urls: Vec<String>,
    pub delivery_interval_ms: u64,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Broker Server\n\
             {:-<40}\n\
             Broker ID: {}\n\
             Bind Address: {}\n\
             Connection URL: {}\n\
             Coordinators: {}\n\
             Delivery Interval: {}ms\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.id,
            self.bind_address,
            self.connection_url,
            self.coordinator_urls.join(", "),
            self.delivery_interval_ms,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}
