//! Query interface over current assignments

use crate::common::{timestamp_now_millis, Assignment, Error, Host, Result, ShardId};
use crate::shardmaster::store::StorePool;
use async_trait::async_trait;

/// Read-only view of the assignment table.
///
/// Implementations supply the two primitives; the host-scoped and
/// single-shard queries derive from them.
#[async_trait]
pub trait ShardMaster: Send + Sync {
    /// Datasets with at least one live assignment, sorted
    async fn datasets(&self) -> Result<Vec<String>>;

    /// Live assignments of `dataset`, ordered by shard name
    async fn dataset_assignments(&self, dataset: &str) -> Result<Vec<Assignment>>;

    async fn shard_assignment(&self, dataset: &str, shard: &str) -> Result<Assignment> {
        self.dataset_assignments(dataset)
            .await?
            .into_iter()
            .find(|a| a.shard.shard == shard)
            .ok_or_else(|| Error::NotFound(format!("{}/{}", dataset, shard)))
    }

    /// Every live assignment listing `host` as a replica
    async fn host_assignments(&self, host: &Host) -> Result<Vec<Assignment>> {
        let mut found = Vec::new();
        for dataset in self.datasets().await? {
            found.extend(
                self.dataset_assignments(&dataset)
                    .await?
                    .into_iter()
                    .filter(|a| a.replicas.contains(host)),
            );
        }
        Ok(found)
    }
}

/// [`ShardMaster`] backed by the assignment store; stale rows are hidden
pub struct StoreShardMaster {
    store: StorePool,
}

impl StoreShardMaster {
    pub fn new(store: StorePool) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ShardMaster for StoreShardMaster {
    async fn datasets(&self) -> Result<Vec<String>> {
        self.store
            .run(|store| {
                let now = timestamp_now_millis();
                let mut live = Vec::new();
                for dataset in store.datasets()? {
                    if store
                        .get_all_assignments(&dataset)?
                        .iter()
                        .any(|a| !store.is_stale(a, now))
                    {
                        live.push(dataset);
                    }
                }
                Ok(live)
            })
            .await
    }

    async fn dataset_assignments(&self, dataset: &str) -> Result<Vec<Assignment>> {
        let dataset = dataset.to_string();
        self.store
            .run(move |store| {
                let now = timestamp_now_millis();
                Ok(store
                    .get_all_assignments(&dataset)?
                    .into_iter()
                    .filter(|a| !store.is_stale(a, now))
                    .collect())
            })
            .await
    }

    async fn shard_assignment(&self, dataset: &str, shard: &str) -> Result<Assignment> {
        let id = ShardId::new(dataset, shard);
        self.store
            .run(move |store| match store.get_assignment(&id)? {
                None => Err(Error::NotFound(id.to_string())),
                Some(a) if store.is_stale(&a, timestamp_now_millis()) => {
                    Err(Error::Stale(format!("{} last refreshed at {}", id, a.timestamp)))
                }
                Some(a) => Ok(a),
            })
            .await
    }

    async fn host_assignments(&self, host: &Host) -> Result<Vec<Assignment>> {
        let host = host.clone();
        self.store
            .run(move |store| {
                let now = timestamp_now_millis();
                Ok(store
                    .assignments_for_host(&host)?
                    .into_iter()
                    .filter(|a| !store.is_stale(a, now))
                    .collect())
            })
            .await
    }
}
