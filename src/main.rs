use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{broker_server, coordinator_server, BrokerParams, CoordinatorParams};
use sports_notify::config::{Config, LoggingConfig};

#[derive(Parser)]
#[command(
    name = "sports-notify",
    version,
    about = "Clustered publish/subscribe broker for sports notifications",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// TOML configuration file; flags override its values
    #[arg(short, long, global = true, env = "SPORTS_NOTIFY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a coordinator
    Coordinator {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// URL brokers and the peer coordinator use to reach this one
        #[arg(long)]
        advertised_url: Option<String>,

        /// Starting role (primary, secondary)
        #[arg(long)]
        role: Option<String>,

        /// Primary coordinator URL, required for a secondary
        #[arg(long)]
        peer_url: Option<String>,

        /// Broker heartbeat timeout in milliseconds
        #[arg(long)]
        heartbeat_timeout_ms: Option<u64>,

        /// Disable CORS
        #[arg(long, default_value = "false")]
        no_cors: bool,

        /// Disable request logging
        #[arg(long, default_value = "false")]
        no_request_logging: bool,
    },

    /// Run a broker
    Broker {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// URL peers use to reach this broker
        #[arg(long)]
        connection_url: Option<String>,

        /// Coordinator URLs, comma-separated, primary first
        #[arg(long)]
        coordinators: Option<String>,

        /// Delivery loop period in milliseconds
        #[arg(long)]
        delivery_interval_ms: Option<u64>,

        /// Fixed broker id instead of a random one
        #[arg(long)]
        id: Option<i32>,

        /// Disable CORS
        #[arg(long, default_value = "false")]
        no_cors: bool,

        /// Disable request logging
        #[arg(long, default_value = "false")]
        no_request_logging: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    // Initialize tracing/logging
    setup_tracing(&config.logging, cli.verbose)?;

    if let Err(e) = sports_notify::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    tracing::info!("sports-notify starting");

    match cli.command {
        Commands::Coordinator {
            bind,
            advertised_url,
            role,
            peer_url,
            heartbeat_timeout_ms,
            no_cors,
            no_request_logging,
        } => {
            tracing::info!(
                bind = ?bind,
                role = ?role,
                peer_url = ?peer_url,
                "Starting coordinator command"
            );
            coordinator_server(CoordinatorParams {
                config,
                bind,
                advertised_url,
                role,
                peer_url,
                heartbeat_timeout_ms,
                enable_cors: !no_cors,
                enable_logging: !no_request_logging,
            })
            .await?;
        }

        Commands::Broker {
            bind,
            connection_url,
            coordinators,
            delivery_interval_ms,
            id,
            no_cors,
            no_request_logging,
        } => {
            tracing::info!(
                bind = ?bind,
                coordinators = ?coordinators,
                "Starting broker command"
            );
            broker_server(BrokerParams {
                config,
                bind,
                connection_url,
                coordinators,
                delivery_interval_ms,
                id,
                enable_cors: !no_cors,
                enable_logging: !no_request_logging,
            })
            .await?;
        }
    }

    tracing::info!("sports-notify stopped");
    Ok(())
}

fn setup_tracing(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        "sports_notify=debug,tower_http=debug,info".to_string()
    } else {
        format!("sports_notify={},warn", logging.level)
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    match logging.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "text" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
        other => anyhow::bail!("Unknown log format '{other}', expected 'text' or 'json'"),
    }

    Ok(())
}
