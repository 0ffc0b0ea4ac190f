//! Assignment store
//!
//! Stores, per (dataset, shard):
//! - the replica list
//! - the shard version it was computed for
//! - the timestamp of the refresh that wrote it
//!
//! Each shard's record is a single key, so a write replaces the whole replica
//! set or nothing. Timestamps never move backwards.

use crate::common::{Assignment, Error, Host, Result, ShardId};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;

const CF_ASSIGNMENTS: &str = "assignments";
const CF_META: &str = "meta";
const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";
const SCHEMA_VERSION: u32 = 1;

/// Durable table of shard assignments
pub trait AssignmentStore: Send + Sync {
    /// Replace the replica set of `shard`. Returns `false` and writes nothing
    /// if the stored assignment carries a newer timestamp.
    fn upsert(&self, shard: &ShardId, replicas: &[Host], timestamp: u64) -> Result<bool>;

    /// Assignment for the shard's (dataset, shard name); the version is not part of the key
    fn get_assignment(&self, shard: &ShardId) -> Result<Option<Assignment>>;

    /// Every assignment of `dataset`, ordered by shard name
    fn get_all_assignments(&self, dataset: &str) -> Result<Vec<Assignment>>;

    /// Datasets with at least one stored assignment, sorted
    fn datasets(&self) -> Result<Vec<String>>;

    /// Remove a shard's assignment. Returns whether one existed.
    fn delete(&self, shard: &ShardId) -> Result<bool>;

    fn staleness_threshold(&self) -> Duration;

    /// Older than `now - staleness_threshold`
    fn is_stale(&self, assignment: &Assignment, now: u64) -> bool {
        let threshold = self.staleness_threshold().as_millis() as u64;
        assignment.timestamp < now.saturating_sub(threshold)
    }

    /// Every assignment listing `host` as a replica
    fn assignments_for_host(&self, host: &Host) -> Result<Vec<Assignment>> {
        let mut found = Vec::new();
        for dataset in self.datasets()? {
            found.extend(
                self.get_all_assignments(&dataset)?
                    .into_iter()
                    .filter(|a| a.replicas.contains(host)),
            );
        }
        Ok(found)
    }

    /// Flush to disk
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAssignment {
    version: Option<u64>,
    replicas: Vec<Host>,
    timestamp: u64,
}

impl StoredAssignment {
    fn into_assignment(self, dataset: &str, shard: &str) -> Assignment {
        Assignment {
            shard: ShardId {
                dataset: dataset.to_string(),
                shard: shard.to_string(),
                version: self.version,
            },
            replicas: self.replicas,
            timestamp: self.timestamp,
        }
    }
}

fn row_key(dataset: &str, shard: &str) -> Vec<u8> {
    let mut key = dataset_prefix(dataset);
    key.extend_from_slice(shard.as_bytes());
    key
}

fn dataset_prefix(dataset: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(dataset.len() + 1);
    prefix.extend_from_slice(dataset.as_bytes());
    prefix.push(0);
    prefix
}

fn split_row_key(key: &[u8]) -> Result<(String, String)> {
    let sep = key
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| Error::Internal("assignment key without separator".into()))?;
    let dataset = std::str::from_utf8(&key[..sep])
        .map_err(|_| Error::Internal("invalid UTF-8 in dataset key".into()))?;
    let shard = std::str::from_utf8(&key[sep + 1..])
        .map_err(|_| Error::Internal("invalid UTF-8 in shard key".into()))?;
    Ok((dataset.to_string(), shard.to_string()))
}

/// RocksDB-backed assignment store
pub struct RocksAssignmentStore {
    db: DB,
    staleness_threshold: Duration,
    write_lock: Mutex<()>,
}

impl RocksAssignmentStore {
    /// Open or create the store; the schema is created if absent
    pub fn open(path: impl AsRef<Path>, staleness_threshold: Duration) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_ASSIGNMENTS, CF_META])?;
        let store = Self {
            db,
            staleness_threshold,
            write_lock: Mutex::new(()),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let meta = self.cf(CF_META)?;
        match self.db.get_cf(meta, SCHEMA_VERSION_KEY)? {
            None => {
                self.db
                    .put_cf(meta, SCHEMA_VERSION_KEY, SCHEMA_VERSION.to_be_bytes())?;
                tracing::info!("Created assignment schema v{}", SCHEMA_VERSION);
            }
            Some(raw) => {
                let found = <[u8; 4]>::try_from(raw.as_slice())
                    .map(u32::from_be_bytes)
                    .map_err(|_| Error::Internal("malformed schema version".into()))?;
                if found != SCHEMA_VERSION {
                    return Err(Error::SchemaMismatch {
                        expected: SCHEMA_VERSION,
                        found,
                    });
                }
            }
        }
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Internal(format!("missing column family {}", name)))
    }

    fn read(&self, key: &[u8]) -> Result<Option<StoredAssignment>> {
        match self.db.get_cf(self.cf(CF_ASSIGNMENTS)?, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl AssignmentStore for RocksAssignmentStore {
    fn upsert(&self, shard: &ShardId, replicas: &[Host], timestamp: u64) -> Result<bool> {
        let key = row_key(&shard.dataset, &shard.shard);
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = self.read(&key)? {
            if existing.timestamp > timestamp {
                return Ok(false);
            }
        }

        let value = bincode::serialize(&StoredAssignment {
            version: shard.version,
            replicas: replicas.to_vec(),
            timestamp,
        })?;
        self.db.put_cf(self.cf(CF_ASSIGNMENTS)?, key, value)?;
        Ok(true)
    }

    fn get_assignment(&self, shard: &ShardId) -> Result<Option<Assignment>> {
        Ok(self
            .read(&row_key(&shard.dataset, &shard.shard))?
            .map(|stored| stored.into_assignment(&shard.dataset, &shard.shard)))
    }

    fn get_all_assignments(&self, dataset: &str) -> Result<Vec<Assignment>> {
        let prefix = dataset_prefix(dataset);
        let iter = self.db.iterator_cf(
            self.cf(CF_ASSIGNMENTS)?,
            IteratorMode::From(prefix.as_slice(), Direction::Forward),
        );

        let mut assignments = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let (dataset, shard) = split_row_key(&key)?;
            let stored: StoredAssignment = bincode::deserialize(&value)?;
            assignments.push(stored.into_assignment(&dataset, &shard));
        }
        Ok(assignments)
    }

    fn datasets(&self) -> Result<Vec<String>> {
        let mut iter = self.db.raw_iterator_cf(self.cf(CF_ASSIGNMENTS)?);
        iter.seek_to_first();

        let mut datasets = Vec::new();
        while iter.valid() {
            let dataset = match iter.key() {
                Some(key) => split_row_key(key)?.0,
                None => break,
            };
            // jump past every row of this dataset
            let mut next = dataset.as_bytes().to_vec();
            next.push(1);
            datasets.push(dataset);
            iter.seek(&next);
        }
        iter.status()?;
        Ok(datasets)
    }

    fn delete(&self, shard: &ShardId) -> Result<bool> {
        let key = row_key(&shard.dataset, &shard.shard);
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.read(&key)?.is_none() {
            return Ok(false);
        }
        self.db.delete_cf(self.cf(CF_ASSIGNMENTS)?, key)?;
        Ok(true)
    }

    fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold
    }

    fn flush(&self) -> Result<()> {
        self.db.flush_cf(self.cf(CF_ASSIGNMENTS)?)?;
        Ok(())
    }
}

/// In-memory assignment store, used when no database path is configured
pub struct MemoryAssignmentStore {
    rows: RwLock<BTreeMap<(String, String), StoredAssignment>>,
    staleness_threshold: Duration,
}

impl MemoryAssignmentStore {
    pub fn new(staleness_threshold: Duration) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            staleness_threshold,
        }
    }
}

impl AssignmentStore for MemoryAssignmentStore {
    fn upsert(&self, shard: &ShardId, replicas: &[Host], timestamp: u64) -> Result<bool> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let key = (shard.dataset.clone(), shard.shard.clone());
        if let Some(existing) = rows.get(&key) {
            if existing.timestamp > timestamp {
                return Ok(false);
            }
        }
        rows.insert(
            key,
            StoredAssignment {
                version: shard.version,
                replicas: replicas.to_vec(),
                timestamp,
            },
        );
        Ok(true)
    }

    fn get_assignment(&self, shard: &ShardId) -> Result<Option<Assignment>> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rows
            .get(&(shard.dataset.clone(), shard.shard.clone()))
            .cloned()
            .map(|stored| stored.into_assignment(&shard.dataset, &shard.shard)))
    }

    fn get_all_assignments(&self, dataset: &str) -> Result<Vec<Assignment>> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rows
            .range((dataset.to_string(), String::new())..)
            .take_while(|((d, _), _)| d == dataset)
            .map(|((d, s), stored)| stored.clone().into_assignment(d, s))
            .collect())
    }

    fn datasets(&self) -> Result<Vec<String>> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let mut datasets: Vec<String> = rows.keys().map(|(d, _)| d.clone()).collect();
        datasets.dedup();
        Ok(datasets)
    }

    fn delete(&self, shard: &ShardId) -> Result<bool> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        Ok(rows
            .remove(&(shard.dataset.clone(), shard.shard.clone()))
            .is_some())
    }

    fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold
    }
}

/// Bounded access to a store from async code.
///
/// Every call takes a permit and runs on the blocking thread pool, so the
/// refresher and the RPC server together never hold more than `size`
/// store operations in flight.
#[derive(Clone)]
pub struct StorePool {
    store: Arc<dyn AssignmentStore>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl StorePool {
    pub fn new(store: Arc<dyn AssignmentStore>, size: usize) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(size.max(1))),
            size: size.max(1),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn store(&self) -> &Arc<dyn AssignmentStore> {
        &self.store
    }

    /// Run `f` against the store once a permit is available
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn AssignmentStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Unavailable("assignment store is closed".into()))?;
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| Error::Internal(format!("store task failed: {}", e)))?
    }

    /// Refuse new operations; in-flight ones complete
    pub fn close(&self) {
        self.permits.close();
    }
}
