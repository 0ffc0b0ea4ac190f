//! Shard master daemon: owns every component and its lifecycle
//!
//! Startup:
//! 1. validate config and bind listeners
//! 2. load hosts, run the first assignment pass, schedule both periodic jobs
//! 3. wait for the first pass, then start answering RPCs
//!
//! Shutdown runs every step even when an earlier one fails:
//! scheduler, admin HTTP, RPC server, worker pool, host source, store.

use crate::common::{Error, Result, ShardMasterConfig};
use crate::rpc::{MultiplexingRequestHandler, RequestResponseServer, RunningServer};
use crate::shardmaster::assigner::MinHashShardAssigner;
use crate::shardmaster::discovery::{filter_for, LocalDirDiscovery, ShardDiscovery};
use crate::shardmaster::hosts::{source_for, CheckpointedHostsReloader, HostsSource};
use crate::shardmaster::http::{AdminServer, AdminState};
use crate::shardmaster::master::StoreShardMaster;
use crate::shardmaster::pool::BlockingPool;
use crate::shardmaster::refresher::{DatasetShardAssignmentRefresher, Readiness};
use crate::shardmaster::scheduler::Scheduler;
use crate::shardmaster::store::{
    AssignmentStore, MemoryAssignmentStore, RocksAssignmentStore, StorePool,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// External dependencies of the daemon
pub struct Collaborators {
    pub discovery: Arc<dyn ShardDiscovery>,
    pub hosts_source: Arc<dyn HostsSource>,
    pub store: Arc<dyn AssignmentStore>,
}

impl Collaborators {
    pub fn from_config(config: &ShardMasterConfig) -> Result<Self> {
        let address = config
            .coordination_address
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("coordination service address is missing".into()))?;
        let hosts_source = source_for(address)?;

        let store: Arc<dyn AssignmentStore> = match &config.db_path {
            Some(path) => {
                tracing::info!("Opening assignment store at {}", path.display());
                Arc::new(RocksAssignmentStore::open(path, config.staleness_threshold())?)
            }
            None => {
                tracing::warn!("No db_path configured, assignments are kept in memory only");
                Arc::new(MemoryAssignmentStore::new(config.staleness_threshold()))
            }
        };

        Ok(Self {
            discovery: Arc::new(LocalDirDiscovery::new(
                config.dataset_root.clone(),
                filter_for(&config.datasets),
            )),
            hosts_source,
            store,
        })
    }
}

pub struct ShardMasterDaemon {
    config: ShardMasterConfig,
}

impl ShardMasterDaemon {
    pub fn new(config: ShardMasterConfig) -> Self {
        Self { config }
    }

    pub async fn start(self) -> Result<RunningShardMaster> {
        self.config.validate()?;
        let collaborators = Collaborators::from_config(&self.config)?;
        self.start_with(collaborators).await
    }

    /// Start with caller-supplied collaborators
    pub async fn start_with(self, collaborators: Collaborators) -> Result<RunningShardMaster> {
        let config = self.config;
        config.validate()?;

        let bind_ip: IpAddr = config.bind_host.parse().map_err(|e| {
            Error::InvalidConfig(format!("invalid bind host {}: {}", config.bind_host, e))
        })?;
        let hosts_file = config
            .hosts_file
            .clone()
            .ok_or_else(|| Error::InvalidConfig("hosts checkpoint file is missing".into()))?;

        let store = StorePool::new(collaborators.store, config.store_connection_budget());
        let hosts = Arc::new(CheckpointedHostsReloader::new(
            collaborators.hosts_source,
            hosts_file,
            config.hosts_drop_threshold,
        ));
        let master = Arc::new(StoreShardMaster::new(store.clone()));
        let handler = Arc::new(MultiplexingRequestHandler::new(
            master,
            config.response_batch_size,
        ));
        let rpc = RequestResponseServer::bind(
            SocketAddr::new(bind_ip, config.service_port),
            handler,
            config.service_concurrency,
        )
        .await?;

        let pool = Arc::new(BlockingPool::new("refresh", config.worker_pool_size));
        let refresher = Arc::new(DatasetShardAssignmentRefresher::new(
            collaborators.discovery,
            hosts.clone(),
            Arc::new(MinHashShardAssigner::new(config.replication_factor)),
            store.clone(),
            pool.clone(),
            config.prune_after_missed_scans,
        ));
        let readiness = refresher.readiness();

        let admin = match config.admin_addr {
            Some(addr) => Some(
                AdminServer::spawn(
                    addr,
                    AdminState {
                        readiness: readiness.clone(),
                        hosts: hosts.clone(),
                    },
                )
                .await?,
            ),
            None => None,
        };

        tracing::info!(
            replication_factor = config.replication_factor,
            workers = config.worker_pool_size,
            rpc_concurrency = config.service_concurrency,
            store_connections = config.store_connection_budget(),
            "Starting shard master"
        );

        let outcome = hosts.reload().await;
        tracing::info!(hosts = hosts.hosts().len(), "Initial host load: {:?}", outcome);
        refresher.trigger();

        let scheduler = Scheduler::new();
        {
            let hosts = hosts.clone();
            scheduler.schedule("hosts-reload", config.hosts_refresh_interval(), move || {
                let hosts = hosts.clone();
                async move {
                    hosts.reload().await;
                }
            });
        }
        {
            let refresher = refresher.clone();
            scheduler.schedule("shard-refresh", config.refresh_interval(), move || {
                let refresher = refresher.clone();
                async move {
                    refresher.trigger();
                }
            });
        }

        if !readiness
            .wait_timeout(config.initial_assignment_timeout())
            .await
        {
            tracing::warn!(
                "First assignment pass not finished after {:?}, serving what is stored",
                config.initial_assignment_timeout()
            );
        }

        let rpc = rpc.spawn()?;
        Ok(RunningShardMaster {
            config,
            scheduler,
            refresher,
            hosts,
            store,
            pool,
            readiness,
            rpc: Some(rpc),
            admin,
        })
    }
}

/// Handles to a started daemon
pub struct RunningShardMaster {
    config: ShardMasterConfig,
    scheduler: Scheduler,
    refresher: Arc<DatasetShardAssignmentRefresher>,
    hosts: Arc<CheckpointedHostsReloader>,
    store: StorePool,
    pool: Arc<BlockingPool>,
    readiness: Readiness,
    rpc: Option<RunningServer>,
    admin: Option<AdminServer>,
}

impl RunningShardMaster {
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.rpc.as_ref().map(RunningServer::local_addr)
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin.as_ref().map(AdminServer::local_addr)
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    pub fn hosts(&self) -> &Arc<CheckpointedHostsReloader> {
        &self.hosts
    }

    pub fn refresher(&self) -> &Arc<DatasetShardAssignmentRefresher> {
        &self.refresher
    }

    pub fn store(&self) -> &StorePool {
        &self.store
    }

    /// Stop everything; returns the first failure after all steps ran
    pub async fn shutdown(mut self) -> Result<()> {
        let timeout = self.config.shutdown_timeout();
        let mut first_error: Option<Error> = None;
        let mut record = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                tracing::error!("Shutdown step {} failed: {}", step, e);
                first_error.get_or_insert(e);
            }
        };

        record("scheduler", self.scheduler.shutdown(timeout).await);
        if let Some(admin) = self.admin.take() {
            record("admin", admin.stop().await);
        }
        if let Some(rpc) = self.rpc.take() {
            record("rpc", rpc.stop(timeout).await);
        }
        record("workers", self.pool.shutdown(timeout).await);
        self.hosts.shutdown().await;
        self.store.close();
        record("store", self.store.store().flush());

        tracing::info!("Shard master stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
