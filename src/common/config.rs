//! Configuration for the shard master daemon

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Shard master configuration
///
/// Loaded from an optional TOML file layered under `SHARDMASTER_*`
/// environment variables; the binary then applies CLI overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardMasterConfig {
    /// Live-host source: `file://<path>` or `http(s)://...`
    pub coordination_address: Option<String>,

    /// Host checkpoint file
    pub hosts_file: Option<PathBuf>,

    /// RocksDB path for assignments (in-memory store if unset)
    pub db_path: Option<PathBuf>,

    /// Root directory holding one sub-directory per dataset
    pub dataset_root: PathBuf,

    /// Dataset allow-list; empty accepts every dataset
    pub datasets: Vec<String>,

    /// Interface the RPC server binds to
    pub bind_host: String,

    /// RPC port (0 = ephemeral)
    pub service_port: u16,

    /// Maximum concurrently served RPC connections
    pub service_concurrency: usize,

    /// Assignments per response frame
    pub response_batch_size: usize,

    /// Refresh worker pool size
    pub worker_pool_size: usize,

    /// Replication factor
    pub replication_factor: usize,

    pub refresh_interval_ms: u64,

    pub staleness_threshold_ms: u64,

    pub hosts_refresh_interval_ms: u64,

    /// Largest tolerated fraction of hosts missing from one reload
    pub hosts_drop_threshold: f64,

    /// Consecutive missed scans before a shard is pruned (0 = never prune)
    pub prune_after_missed_scans: u32,

    /// How long startup waits for the first assignment pass before serving
    pub initial_assignment_timeout_ms: u64,

    /// Per-step timeout when draining the RPC server and worker pool
    pub shutdown_timeout_ms: u64,

    /// Bind address for the admin HTTP API (disabled if unset)
    pub admin_addr: Option<SocketAddr>,

    /// Logging level
    pub log_level: String,
}

impl Default for ShardMasterConfig {
    fn default() -> Self {
        Self {
            coordination_address: None,
            hosts_file: None,
            db_path: None,
            dataset_root: PathBuf::from("./datasets"),
            datasets: Vec::new(),
            bind_host: "0.0.0.0".to_string(),
            service_port: 0,
            service_concurrency: 10,
            response_batch_size: 1000,
            worker_pool_size: 5,
            replication_factor: 2,
            refresh_interval_ms: 5 * 60 * 1000,
            staleness_threshold_ms: 15 * 60 * 1000,
            hosts_refresh_interval_ms: 60 * 1000,
            hosts_drop_threshold: 0.5,
            prune_after_missed_scans: 2,
            initial_assignment_timeout_ms: 30 * 1000,
            shutdown_timeout_ms: 10 * 1000,
            admin_addr: None,
            log_level: "info".to_string(),
        }
    }
}

impl ShardMasterConfig {
    /// Load from an optional TOML file, then `SHARDMASTER_*` environment variables
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("SHARDMASTER")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("datasets"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error::InvalidConfig;

        match self.coordination_address.as_deref() {
            None | Some("") => {
                return Err(InvalidConfig(
                    "coordination service address is missing".into(),
                ))
            }
            _ => {}
        }
        if self.hosts_file.is_none() {
            return Err(InvalidConfig("hosts checkpoint file is missing".into()));
        }
        if self.replication_factor == 0 {
            return Err(InvalidConfig("replication factor must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.hosts_drop_threshold) {
            return Err(InvalidConfig(format!(
                "hosts drop threshold must be within [0, 1], got {}",
                self.hosts_drop_threshold
            )));
        }
        if self.service_concurrency == 0 || self.worker_pool_size == 0 {
            return Err(InvalidConfig(
                "service concurrency and worker pool size must be positive".into(),
            ));
        }
        if self.response_batch_size == 0 {
            return Err(InvalidConfig("response batch size must be positive".into()));
        }
        if self.refresh_interval_ms == 0 || self.hosts_refresh_interval_ms == 0 {
            return Err(InvalidConfig("refresh intervals must be positive".into()));
        }
        if self.staleness_threshold_ms <= self.refresh_interval_ms {
            return Err(InvalidConfig(format!(
                "staleness threshold ({}ms) must exceed the refresh interval ({}ms)",
                self.staleness_threshold_ms, self.refresh_interval_ms
            )));
        }
        for dataset in &self.datasets {
            crate::common::validate_dataset(dataset)
                .map_err(|e| InvalidConfig(format!("dataset filter: {}", e)))?;
        }
        Ok(())
    }

    /// Store connections the refresher and RPC paths may hold at once
    pub fn store_connection_budget(&self) -> usize {
        (self.worker_pool_size + self.service_concurrency + 5).max(10)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }

    pub fn hosts_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.hosts_refresh_interval_ms)
    }

    pub fn initial_assignment_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_assignment_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
