//! Shard master daemon binary

use clap::{Parser, Subcommand};
use shardmaster::common::parse_duration_millis;
use shardmaster::{ShardMasterConfig, ShardMasterDaemon, BUILD_INFO};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardmaster")]
#[command(about = "Shard discovery and replica assignment service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the shard master
    Serve {
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Live-host source (file://... or http(s)://...)
        #[arg(long)]
        coordination_address: Option<String>,

        /// Host checkpoint file
        #[arg(long)]
        hosts_file: Option<PathBuf>,

        /// Assignment database directory
        #[arg(long)]
        db: Option<PathBuf>,

        /// Dataset root directory
        #[arg(long)]
        dataset_root: Option<PathBuf>,

        /// Only assign these datasets (comma-separated)
        #[arg(long, value_delimiter = ',')]
        datasets: Vec<String>,

        /// RPC port (0 = ephemeral)
        #[arg(long)]
        port: Option<u16>,

        /// Replication factor
        #[arg(long)]
        replicas: Option<usize>,

        /// Admin HTTP bind address
        #[arg(long)]
        admin: Option<SocketAddr>,

        /// Shard refresh interval (e.g. "30s", "5m")
        #[arg(long, value_parser = duration_ms)]
        refresh_interval: Option<u64>,

        /// Host list reload interval
        #[arg(long, value_parser = duration_ms)]
        hosts_refresh_interval: Option<u64>,

        /// Age after which an assignment is stale
        #[arg(long, value_parser = duration_ms)]
        staleness: Option<u64>,
    },

    /// Print the effective configuration and exit
    CheckConfig {
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn duration_ms(s: &str) -> Result<u64, String> {
    parse_duration_millis(s).map_err(|e| e.to_string())
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            coordination_address,
            hosts_file,
            db,
            dataset_root,
            datasets,
            port,
            replicas,
            admin,
            refresh_interval,
            hosts_refresh_interval,
            staleness,
        } => {
            // File and environment first, CLI flags win
            let mut config = ShardMasterConfig::load(config.as_deref())?;
            if coordination_address.is_some() {
                config.coordination_address = coordination_address;
            }
            if hosts_file.is_some() {
                config.hosts_file = hosts_file;
            }
            if db.is_some() {
                config.db_path = db;
            }
            if let Some(root) = dataset_root {
                config.dataset_root = root;
            }
            if !datasets.is_empty() {
                config.datasets = datasets;
            }
            if let Some(port) = port {
                config.service_port = port;
            }
            if let Some(replicas) = replicas {
                config.replication_factor = replicas;
            }
            if admin.is_some() {
                config.admin_addr = admin;
            }
            if let Some(ms) = refresh_interval {
                config.refresh_interval_ms = ms;
            }
            if let Some(ms) = hosts_refresh_interval {
                config.hosts_refresh_interval_ms = ms;
            }
            if let Some(ms) = staleness {
                config.staleness_threshold_ms = ms;
            }

            init_tracing(&config.log_level);
            tracing::info!("shardmaster {}", BUILD_INFO);
            config.validate()?;

            let running = ShardMasterDaemon::new(config).start().await?;
            if let Some(addr) = running.rpc_addr() {
                tracing::info!("Shard master serving on {}", addr);
            }

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutdown requested");
            running.shutdown().await?;
        }
        Commands::CheckConfig { config } => {
            let config = ShardMasterConfig::load(config.as_deref())?;
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
