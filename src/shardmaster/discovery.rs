//! Shard discovery
//!
//! Enumerates datasets and their shards under a dataset root laid out as
//! `<root>/<dataset>/<shard>[.<version>]/`. A [`ShardFilter`] decides which
//! datasets and shards take part in assignment.

use crate::common::{validate_dataset, validate_shard, Error, Result, ShardId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Predicate over datasets and shards
pub trait ShardFilter: Send + Sync {
    fn accept_dataset(&self, dataset: &str) -> bool;

    fn accept_shard(&self, shard: &ShardId) -> bool {
        self.accept_dataset(&shard.dataset)
    }
}

/// Accepts everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ShardFilter for AcceptAll {
    fn accept_dataset(&self, _dataset: &str) -> bool {
        true
    }
}

/// Accepts only the listed datasets
#[derive(Debug, Clone)]
pub struct DatasetAllowList {
    datasets: HashSet<String>,
}

impl DatasetAllowList {
    pub fn new(datasets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            datasets: datasets.into_iter().map(Into::into).collect(),
        }
    }
}

impl ShardFilter for DatasetAllowList {
    fn accept_dataset(&self, dataset: &str) -> bool {
        self.datasets.contains(dataset)
    }
}

/// Build the configured filter: allow-list if datasets are named, accept-all otherwise
pub fn filter_for(datasets: &[String]) -> Arc<dyn ShardFilter> {
    if datasets.is_empty() {
        Arc::new(AcceptAll)
    } else {
        Arc::new(DatasetAllowList::new(datasets.iter().cloned()))
    }
}

/// Source of datasets and shard ids
#[async_trait]
pub trait ShardDiscovery: Send + Sync {
    /// Datasets accepted by the filter, sorted
    async fn list_datasets(&self) -> Result<Vec<String>>;

    /// Newest version of every accepted shard of `dataset`, sorted
    async fn list_shards(&self, dataset: &str) -> Result<Vec<ShardId>>;
}

/// Discovery over a local (or locally mounted) dataset root
pub struct LocalDirDiscovery {
    root: PathBuf,
    filter: Arc<dyn ShardFilter>,
}

impl LocalDirDiscovery {
    pub fn new(root: impl Into<PathBuf>, filter: Arc<dyn ShardFilter>) -> Self {
        Self {
            root: root.into(),
            filter,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ShardDiscovery for LocalDirDiscovery {
    async fn list_datasets(&self) -> Result<Vec<String>> {
        let mut datasets: Vec<String> = list_subdirs(&self.root)
            .await?
            .into_iter()
            .filter(|name| {
                if let Err(e) = validate_dataset(name) {
                    tracing::debug!("Skipping dataset directory {:?}: {}", name, e);
                    return false;
                }
                self.filter.accept_dataset(name)
            })
            .collect();
        datasets.sort();
        Ok(datasets)
    }

    async fn list_shards(&self, dataset: &str) -> Result<Vec<ShardId>> {
        validate_dataset(dataset)?;

        let mut newest: BTreeMap<String, ShardId> = BTreeMap::new();
        for name in list_subdirs(&self.root.join(dataset)).await? {
            // in-progress builds and hidden entries
            if name.starts_with('.') || validate_shard(&name).is_err() {
                continue;
            }
            let shard = ShardId::from_dir_name(dataset, &name);
            if !self.filter.accept_shard(&shard) {
                continue;
            }
            match newest.get(&shard.shard) {
                Some(existing) if existing.version >= shard.version => {}
                _ => {
                    newest.insert(shard.shard.clone(), shard);
                }
            }
        }

        Ok(newest.into_values().collect())
    }
}

async fn list_subdirs(dir: &Path) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::Discovery(format!("cannot list {}: {}", dir.display(), e)))?;

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::Discovery(format!("cannot list {}: {}", dir.display(), e)))?
    {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => tracing::debug!("Skipping non UTF-8 entry {:?}", raw),
        }
    }
    Ok(names)
}
