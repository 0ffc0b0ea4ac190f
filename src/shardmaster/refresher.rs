//! Dataset shard assignment refresher
//!
//! One refresh cycle:
//! 1. snapshot the live host set
//! 2. list datasets (a failure here ends the cycle with nothing written)
//! 3. per dataset, on the worker pool: list shards, assign replicas, persist
//!    each shard, then prune shards missing from consecutive scans
//!
//! A shard whose write fails keeps its previous assignment and is retried on
//! the next cycle. A dataset whose scan fails is left untouched.

use crate::common::{timestamp_now_millis, Error, Host, LiveHostSet, Result, ShardId};
use crate::shardmaster::assigner::ShardAssigner;
use crate::shardmaster::discovery::ShardDiscovery;
use crate::shardmaster::hosts::CheckpointedHostsReloader;
use crate::shardmaster::pool::BlockingPool;
use crate::shardmaster::store::StorePool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Signals completion of the first full assignment pass
#[derive(Clone)]
pub struct Readiness {
    rx: watch::Receiver<bool>,
}

impl Readiness {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until ready. Returns `false` if the refresher went away first.
    pub async fn wait(&self) -> bool {
        let mut rx = self.rx.clone();
        let ready = rx.wait_for(|ready| *ready).await.is_ok();
        ready
    }

    /// Wait until ready or `timeout` elapses
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait())
            .await
            .unwrap_or(false)
    }
}

/// Outcome of one dataset within a cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DatasetReport {
    pub shards: usize,
    pub persisted: usize,
    /// Skipped because the stored assignment was newer
    pub superseded: usize,
    pub unassigned: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// Outcome of one refresh cycle
#[derive(Debug, Default, Clone)]
pub struct RefreshReport {
    pub cycle: u64,
    pub hosts: usize,
    pub datasets: usize,
    pub failed_datasets: usize,
    pub shards: usize,
    pub persisted: usize,
    pub superseded: usize,
    pub unassigned: usize,
    pub failed_shards: usize,
    pub pruned: usize,
    pub elapsed: Duration,
}

impl RefreshReport {
    fn absorb(&mut self, dataset: &DatasetReport) {
        self.shards += dataset.shards;
        self.persisted += dataset.persisted;
        self.superseded += dataset.superseded;
        self.unassigned += dataset.unassigned;
        self.failed_shards += dataset.failed;
        self.pruned += dataset.pruned;
    }

    pub fn is_clean(&self) -> bool {
        self.failed_datasets == 0 && self.failed_shards == 0
    }

    /// At least one dataset was scanned, or there was nothing to scan
    pub fn completed_any(&self) -> bool {
        self.datasets == 0 || self.failed_datasets < self.datasets
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DatasetShardAssignmentRefresher {
    discovery: Arc<dyn ShardDiscovery>,
    hosts: Arc<CheckpointedHostsReloader>,
    assigner: Arc<dyn ShardAssigner>,
    store: StorePool,
    pool: Arc<BlockingPool>,
    /// Consecutive missed scans before pruning; 0 keeps shards forever
    prune_after: u32,
    missed_scans: Mutex<HashMap<(String, String), u32>>,
    running: AtomicBool,
    cycles: AtomicU64,
    ready: watch::Sender<bool>,
}

impl DatasetShardAssignmentRefresher {
    pub fn new(
        discovery: Arc<dyn ShardDiscovery>,
        hosts: Arc<CheckpointedHostsReloader>,
        assigner: Arc<dyn ShardAssigner>,
        store: StorePool,
        pool: Arc<BlockingPool>,
        prune_after: u32,
    ) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            discovery,
            hosts,
            assigner,
            store,
            pool,
            prune_after,
            missed_scans: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            ready,
        }
    }

    pub fn readiness(&self) -> Readiness {
        Readiness::new(self.ready.subscribe())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start a cycle in the background unless one is already running
    pub fn trigger(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.is_running() {
            tracing::info!("Previous shard refresh still running, skipping this tick");
            return None;
        }
        let this = self.clone();
        Some(tokio::spawn(async move {
            match this.refresh().await {
                Ok(report) => {
                    tracing::info!(
                        cycle = report.cycle,
                        hosts = report.hosts,
                        datasets = report.datasets,
                        shards = report.shards,
                        persisted = report.persisted,
                        unassigned = report.unassigned,
                        failed_datasets = report.failed_datasets,
                        failed_shards = report.failed_shards,
                        pruned = report.pruned,
                        "Shard refresh finished in {:?}",
                        report.elapsed
                    );
                }
                Err(Error::RefreshInProgress) => {
                    tracing::debug!("Shard refresh already running")
                }
                Err(Error::PoolShutdown) => {
                    tracing::info!("Shard refresh interrupted by shutdown")
                }
                Err(e) => tracing::error!("Shard refresh failed: {}", e),
            }
        }))
    }

    /// Run one full cycle
    pub async fn refresh(self: &Arc<Self>) -> Result<RefreshReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::RefreshInProgress);
        }
        let _running = RunningGuard(&self.running);

        let started = Instant::now();
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let hosts = self.hosts.hosts();
        if hosts.is_empty() {
            tracing::warn!(cycle, "No live hosts, shards will be left unassigned");
        }

        let datasets = self.discovery.list_datasets().await?;

        let mut handles = Vec::with_capacity(datasets.len());
        for dataset in &datasets {
            let this = self.clone();
            let hosts = hosts.clone();
            let dataset = dataset.clone();
            let handle = self
                .pool
                .submit(async move { this.refresh_dataset(&dataset, &hosts).await })
                .await?;
            handles.push(handle);
        }

        let mut report = RefreshReport {
            cycle,
            hosts: hosts.len(),
            datasets: datasets.len(),
            ..Default::default()
        };
        let results = futures_util::future::join_all(handles).await;
        for (dataset, result) in datasets.iter().zip(results) {
            match result {
                Ok(Ok(dataset_report)) => report.absorb(&dataset_report),
                Ok(Err(e)) => {
                    tracing::warn!(dataset = %dataset, "Dataset refresh failed: {}", e);
                    report.failed_datasets += 1;
                }
                Err(e) => {
                    tracing::error!(dataset = %dataset, "Dataset refresh task failed: {}", e);
                    report.failed_datasets += 1;
                }
            }
        }

        report.pruned += self.prune_vanished_datasets(&datasets).await;
        report.elapsed = started.elapsed();

        if report.completed_any() {
            if !self.ready.send_replace(true) {
                tracing::info!(cycle, "Initial shard assignment complete");
            }
        } else if !*self.ready.borrow() {
            tracing::warn!(
                cycle,
                datasets = report.datasets,
                "Every dataset scan failed, still waiting for a first assignment"
            );
        }
        Ok(report)
    }

    async fn refresh_dataset(&self, dataset: &str, hosts: &LiveHostSet) -> Result<DatasetReport> {
        let shards = self.discovery.list_shards(dataset).await?;
        let plan = self.assigner.assign(&shards, hosts);

        let mut report = DatasetReport {
            shards: plan.len(),
            ..Default::default()
        };
        let timestamp = timestamp_now_millis();
        for (shard, replicas) in plan {
            if replicas.is_empty() {
                report.unassigned += 1;
            }
            match self.persist(shard.clone(), replicas, timestamp).await {
                Ok(true) => report.persisted += 1,
                Ok(false) => report.superseded += 1,
                Err(e) => {
                    tracing::warn!(
                        dataset = %shard.dataset,
                        shard = %shard.shard,
                        "Failed to persist assignment, keeping previous: {}",
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        let discovered: HashSet<String> = shards.into_iter().map(|s| s.shard).collect();
        report.pruned = self.prune_missing(dataset, &discovered).await?;
        Ok(report)
    }

    async fn persist(&self, shard: ShardId, replicas: Vec<Host>, timestamp: u64) -> Result<bool> {
        self.store
            .run(move |store| store.upsert(&shard, &replicas, timestamp))
            .await
    }

    /// Count a miss for every stored shard of `dataset` not in `discovered`,
    /// and delete those that reached the prune limit
    async fn prune_missing(&self, dataset: &str, discovered: &HashSet<String>) -> Result<usize> {
        if self.prune_after == 0 {
            return Ok(0);
        }

        let owned = dataset.to_string();
        let stored = self
            .store
            .run(move |store| store.get_all_assignments(&owned))
            .await?;

        let mut expired = Vec::new();
        {
            let mut missed = self
                .missed_scans
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            missed.retain(|(d, s), _| !(d == dataset && discovered.contains(s)));
            for assignment in stored {
                if discovered.contains(&assignment.shard.shard) {
                    continue;
                }
                let key = (dataset.to_string(), assignment.shard.shard.clone());
                let count = missed.entry(key.clone()).or_insert(0);
                *count += 1;
                if *count >= self.prune_after {
                    missed.remove(&key);
                    expired.push(assignment.shard);
                }
            }
        }

        let mut pruned = 0;
        for shard in expired {
            let target = shard.clone();
            match self.store.run(move |store| store.delete(&target)).await {
                Ok(true) => {
                    tracing::info!(
                        dataset = %shard.dataset,
                        shard = %shard.shard,
                        "Pruned assignment of vanished shard"
                    );
                    pruned += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(shard = %shard, "Failed to prune assignment: {}", e),
            }
        }
        Ok(pruned)
    }

    /// Stored datasets that discovery no longer lists count as fully missed
    async fn prune_vanished_datasets(&self, discovered: &[String]) -> usize {
        if self.prune_after == 0 {
            return 0;
        }
        let stored = match self.store.run(|store| store.datasets()).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Failed to list stored datasets for pruning: {}", e);
                return 0;
            }
        };

        let discovered: HashSet<&str> = discovered.iter().map(String::as_str).collect();
        let mut pruned = 0;
        for dataset in stored
            .iter()
            .filter(|d| !discovered.contains(d.as_str()))
        {
            match self.prune_missing(dataset, &HashSet::new()).await {
                Ok(n) => pruned += n,
                Err(e) => tracing::warn!(dataset = %dataset, "Failed to prune dataset: {}", e),
            }
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shardmaster::assigner::MinHashShardAssigner;
    use crate::shardmaster::discovery::{AcceptAll, LocalDirDiscovery};
    use crate::shardmaster::hosts::StaticHostsSource;
    use crate::shardmaster::store::{AssignmentStore, MemoryAssignmentStore};
    use std::path::Path;
    use tempfile::tempdir;

    struct Fixture {
        refresher: Arc<DatasetShardAssignmentRefresher>,
        store: Arc<MemoryAssignmentStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture(root: &Path, hosts: usize, prune_after: u32) -> Fixture {
        let dir = tempdir().unwrap();
        let source = Arc::new(StaticHostsSource::new(
            (0..hosts).map(|i| Host::new(format!("h{}", i), 9000)).collect(),
        ));
        let reloader = Arc::new(CheckpointedHostsReloader::new(
            source,
            dir.path().join("hosts.json"),
            0.5,
        ));
        let store = Arc::new(MemoryAssignmentStore::new(Duration::from_secs(900)));
        let refresher = Arc::new(DatasetShardAssignmentRefresher::new(
            Arc::new(LocalDirDiscovery::new(root, Arc::new(AcceptAll))),
            reloader,
            Arc::new(MinHashShardAssigner::new(2)),
            StorePool::new(store.clone(), 4),
            Arc::new(BlockingPool::new("refresh", 2)),
            prune_after,
        ));
        Fixture {
            refresher,
            store,
            _dir: dir,
        }
    }

    fn mkdirs(root: &Path, paths: &[&str]) {
        for p in paths {
            std::fs::create_dir_all(root.join(p)).unwrap();
        }
    }

    #[tokio::test]
    async fn test_cycle_assigns_every_shard() {
        let root = tempdir().unwrap();
        mkdirs(
            root.path(),
            &["orders/s1", "orders/s2", "orders/s3", "clicks/s1"],
        );
        let f = fixture(root.path(), 3, 2);
        f.refresher.hosts.reload().await;

        let readiness = f.refresher.readiness();
        assert!(!readiness.is_ready());

        let report = f.refresher.refresh().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.datasets, 2);
        assert_eq!(report.shards, 4);
        assert_eq!(report.persisted, 4);
        assert!(readiness.is_ready());

        for dataset in ["orders", "clicks"] {
            for a in f.store.get_all_assignments(dataset).unwrap() {
                assert_eq!(a.replicas.len(), 2);
            }
        }
    }

    #[tokio::test]
    async fn test_no_hosts_leaves_shards_unassigned() {
        let root = tempdir().unwrap();
        mkdirs(root.path(), &["orders/s1"]);
        let f = fixture(root.path(), 0, 2);

        let report = f.refresher.refresh().await.unwrap();
        assert_eq!(report.unassigned, 1);
        let a = f
            .store
            .get_assignment(&ShardId::new("orders", "s1"))
            .unwrap()
            .unwrap();
        assert!(a.is_unassigned());
    }

    #[tokio::test]
    async fn test_discovery_failure_leaves_store_untouched() {
        let root = tempdir().unwrap();
        mkdirs(root.path(), &["orders/s1"]);
        let f = fixture(root.path(), 3, 2);
        f.refresher.hosts.reload().await;
        f.refresher.refresh().await.unwrap();
        let before = f.store.get_all_assignments("orders").unwrap();

        std::fs::remove_dir_all(root.path()).unwrap();
        assert!(matches!(
            f.refresher.refresh().await,
            Err(Error::Discovery(_))
        ));
        assert_eq!(f.store.get_all_assignments("orders").unwrap(), before);
    }

    #[tokio::test]
    async fn test_prunes_after_consecutive_misses() {
        let root = tempdir().unwrap();
        mkdirs(root.path(), &["orders/s1", "orders/s2", "gone/s1"]);
        let f = fixture(root.path(), 3, 2);
        f.refresher.hosts.reload().await;
        f.refresher.refresh().await.unwrap();

        std::fs::remove_dir_all(root.path().join("orders/s2")).unwrap();
        std::fs::remove_dir_all(root.path().join("gone")).unwrap();

        let first = f.refresher.refresh().await.unwrap();
        assert_eq!(first.pruned, 0);
        assert_eq!(f.store.get_all_assignments("orders").unwrap().len(), 2);
        assert_eq!(f.store.get_all_assignments("gone").unwrap().len(), 1);

        let second = f.refresher.refresh().await.unwrap();
        assert_eq!(second.pruned, 2);
        assert_eq!(f.store.get_all_assignments("orders").unwrap().len(), 1);
        assert_eq!(f.store.datasets().unwrap(), vec!["orders"]);
    }

    #[tokio::test]
    async fn test_reappearing_shard_resets_miss_count() {
        let root = tempdir().unwrap();
        mkdirs(root.path(), &["orders/s1", "orders/s2"]);
        let f = fixture(root.path(), 3, 2);
        f.refresher.hosts.reload().await;
        f.refresher.refresh().await.unwrap();

        std::fs::remove_dir_all(root.path().join("orders/s2")).unwrap();
        f.refresher.refresh().await.unwrap();
        mkdirs(root.path(), &["orders/s2"]);
        f.refresher.refresh().await.unwrap();
        std::fs::remove_dir_all(root.path().join("orders/s2")).unwrap();
        let report = f.refresher.refresh().await.unwrap();

        assert_eq!(report.pruned, 0);
        assert_eq!(f.store.get_all_assignments("orders").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retain_policy_never_prunes() {
        let root = tempdir().unwrap();
        mkdirs(root.path(), &["orders/s1", "orders/s2"]);
        let f = fixture(root.path(), 3, 0);
        f.refresher.hosts.reload().await;
        f.refresher.refresh().await.unwrap();

        std::fs::remove_dir_all(root.path().join("orders/s2")).unwrap();
        for _ in 0..3 {
            f.refresher.refresh().await.unwrap();
        }
        assert_eq!(f.store.get_all_assignments("orders").unwrap().len(), 2);
    }

    /// Lists datasets but fails every shard scan until `healthy` is set
    struct FlakyDiscovery {
        inner: LocalDirDiscovery,
        healthy: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ShardDiscovery for FlakyDiscovery {
        async fn list_datasets(&self) -> Result<Vec<String>> {
            self.inner.list_datasets().await
        }

        async fn list_shards(&self, dataset: &str) -> Result<Vec<ShardId>> {
            if !self.healthy.load(Ordering::Acquire) {
                return Err(Error::Discovery(format!("{} is unreadable", dataset)));
            }
            self.inner.list_shards(dataset).await
        }
    }

    #[tokio::test]
    async fn test_not_ready_while_every_dataset_fails() {
        let root = tempdir().unwrap();
        mkdirs(root.path(), &["orders/s1", "clicks/s1"]);
        let dir = tempdir().unwrap();
        let reloader = Arc::new(CheckpointedHostsReloader::new(
            Arc::new(StaticHostsSource::new(vec![Host::new("h1", 9000)])),
            dir.path().join("hosts.json"),
            0.5,
        ));
        reloader.reload().await;
        let discovery = Arc::new(FlakyDiscovery {
            inner: LocalDirDiscovery::new(root.path(), Arc::new(AcceptAll)),
            healthy: AtomicBool::new(false),
        });
        let refresher = Arc::new(DatasetShardAssignmentRefresher::new(
            discovery.clone(),
            reloader,
            Arc::new(MinHashShardAssigner::new(2)),
            StorePool::new(Arc::new(MemoryAssignmentStore::new(Duration::from_secs(900))), 4),
            Arc::new(BlockingPool::new("refresh", 2)),
            2,
        ));

        let report = refresher.refresh().await.unwrap();
        assert_eq!(report.failed_datasets, 2);
        assert!(!report.completed_any());
        assert!(!refresher.readiness().is_ready());

        discovery.healthy.store(true, Ordering::Release);
        let report = refresher.refresh().await.unwrap();
        assert!(report.is_clean());
        assert!(refresher.readiness().is_ready());
    }

    #[tokio::test]
    async fn test_empty_root_is_ready() {
        let root = tempdir().unwrap();
        let f = fixture(root.path(), 3, 2);
        let report = f.refresher.refresh().await.unwrap();
        assert_eq!(report.datasets, 0);
        assert!(f.refresher.readiness().is_ready());
    }

    #[tokio::test]
    async fn test_overlapping_refresh_is_rejected() {
        let root = tempdir().unwrap();
        mkdirs(root.path(), &["orders/s1"]);
        let f = fixture(root.path(), 3, 2);

        f.refresher.running.store(true, Ordering::Release);
        assert!(matches!(
            f.refresher.refresh().await,
            Err(Error::RefreshInProgress)
        ));
        assert!(f.refresher.trigger().is_none());

        f.refresher.running.store(false, Ordering::Release);
        f.refresher.trigger().unwrap().await.unwrap();
        assert!(f.refresher.readiness().is_ready());
    }
}
