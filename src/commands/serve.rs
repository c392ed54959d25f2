use anyhow::{Context, Result};

use sports_notify::broker::config::parse_url_list;
use sports_notify::broker::BrokerServer;
use sports_notify::config::Config;
use sports_notify::coordinator::{CoordinatorRole, CoordinatorServer};

// ============================================================================
// Shutdown
// ============================================================================

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
        }
        Err(e) => {
            tracing::error!("Failed to wait for Ctrl+C: {}", e);
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Parameters for the coordinator command
pub struct CoordinatorParams {
    pub config: Config,
    pub bind: Option<String>,
    pub advertised_url: Option<String>,
    pub role: Option<String>,
    pub peer_url: Option<String>,
    pub heartbeat_timeout_ms: Option<u64>,
    pub enable_cors: bool,
    pub enable_logging: bool,
}

/// Start the coordinator server
pub async fn coordinator_server(params: CoordinatorParams) -> Result<()> {
    let CoordinatorParams {
        config,
        bind,
        advertised_url,
        role,
        peer_url,
        heartbeat_timeout_ms,
        enable_cors,
        enable_logging,
    } = params;

    let mut config = config.coordinator;
    if let Some(bind) = bind {
        config.bind_address = bind.parse().context("Invalid bind address")?;
        if advertised_url.is_none() {
            config.advertised_url = format!("http://127.0.0.1:{}", config.bind_address.port());
        }
    }
    if let Some(url) = advertised_url {
        config.advertised_url = url;
    }
    if let Some(role) = role {
        config.role = role
            .parse::<CoordinatorRole>()
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    if peer_url.is_some() {
        config.peer_url = peer_url;
    }
    if let Some(ms) = heartbeat_timeout_ms {
        config.heartbeat_timeout_ms = ms;
    }
    config.enable_cors = enable_cors && config.enable_cors;
    config.enable_request_logging = enable_logging && config.enable_request_logging;

    println!("Starting Coordinator Server");
    println!("===========================");
    println!("  Role: {}", config.role);
    println!("  Sweep Interval: {}ms", config.sweep_interval_ms);
    println!("  Sync Interval: {}ms", config.sync_interval_ms);
    println!("  CORS: {}", on_off(config.enable_cors));
    println!("  Request Logging: {}", on_off(config.enable_request_logging));
    println!();

    let bind_address = config.bind_address;
    let server = CoordinatorServer::new(config).context("Failed to create coordinator server")?;

    println!("{}", server.info().display());
    println!();
    println!("API Endpoints:");
    println!("  POST /coordinator/register              - Register a broker");
    println!("  POST /coordinator/heartbeat             - Broker heartbeat");
    println!("  GET  /coordinator/brokers               - Current membership");
    println!("  GET  /coordinator/leader                - Current leader");
    println!("  POST /coordinator/register-coordinator  - Register the secondary");
    println!("  POST /coordinator/coordinator-heartbeat - Primary heartbeat");
    println!("  POST /coordinator/sync-data             - Primary state snapshot");
    println!("  GET  /coordinator/isPrimary-coordinator - Role query");
    println!("  GET  /health                            - Health check");
    println!("  GET  /metrics                           - Prometheus metrics endpoint");
    println!();
    println!("Coordinator server listening on http://{bind_address}");
    println!("Press Ctrl+C to stop.\n");

    server.start_with_shutdown(ctrl_c()).await?;

    println!("Coordinator server stopped.");
    Ok(())
}

// ============================================================================
// Broker
// ============================================================================

/// Parameters for the broker command
pub struct BrokerParams {
    pub config: Config,
    pub bind: Option<String>,
    pub connection_url: Option<String>,
    pub coordinators: Option<String>,
    pub delivery_interval_ms: Option<u64>,
    pub id: Option<i32>,
    pub enable_cors: bool,
    pub enable_logging: bool,
}

/// Start a broker server
pub async fn broker_server(params: BrokerParams) -> Result<()> {
    let BrokerParams {
        config,
        bind,
        connection_url,
        coordinators,
        delivery_interval_ms,
        id,
        enable_cors,
        enable_logging,
    } = params;

    let mut config = config.broker;
    if let Some(bind) = bind {
        config.bind_address = bind.parse().context("Invalid bind address")?;
        if connection_url.is_none() {
            config.connection_url = format!("http://127.0.0.1:{}", config.bind_address.port());
        }
    }
    if let Some(url) = connection_url {
        config.connection_url = url;
    }
    if let Some(urls) = coordinators {
        config.coordinator_urls = parse_url_list(&urls);
    }
    if let Some(ms) = delivery_interval_ms {
        config.delivery_interval_ms = ms;
    }
    config.enable_cors = enable_cors && config.enable_cors;
    config.enable_request_logging = enable_logging && config.enable_request_logging;

    println!("Starting Broker Server");
    println!("======================");
    println!("  Heartbeat Interval: {}ms", config.heartbeat_interval_ms);
    println!("  Request Timeout: {}ms", config.request_timeout_ms);
    println!();

    let bind_address = config.bind_address;
    let server = match id {
        Some(id) => BrokerServer::with_id(config, id),
        None => BrokerServer::new(config),
    }
    .context("Failed to create broker server")?;

    println!("{}", server.info().display());
    println!();
    println!("API Endpoints:");
    println!("  POST /broker/register-publisher  - Register a publisher");
    println!("  POST /broker/register-subscriber - Register a subscriber");
    println!("  PUT  /broker/subscribe           - Subscribe to a topic");
    println!("  PUT  /broker/unsubscribe         - Unsubscribe from a topic");
    println!("  POST /broker/publish             - Publish a message");
    println!("  GET  /broker/gettopics           - Topics for a registered subscriber");
    println!("  GET  /broker/brokers-list        - Known brokers");
    println!("  GET  /health                     - Health check");
    println!("  GET  /metrics                    - Prometheus metrics endpoint");
    println!();
    println!("Broker server listening on http://{bind_address}");
    println!("Press Ctrl+C to stop.\n");

    server.start_with_shutdown(ctrl_c()).await?;

    println!("Broker server stopped.");
    Ok(())
}
