//! Live host tracking
//!
//! A [`HostsSource`] polls the coordination service for the current daemon
//! list. [`CheckpointedHostsReloader`] guards it: a poll that drops more than
//! `drop_threshold` of the known hosts is ignored, and every accepted set is
//! checkpointed to disk so a restart begins from the last good view.

use crate::common::{timestamp_now_millis, Error, Host, LiveHostSet, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

const HTTP_SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// External provider of the live daemon list
#[async_trait]
pub trait HostsSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Host>>;

    /// Release connections held by the source
    async fn shutdown(&self) {}
}

/// Build the source named by a coordination address
pub fn source_for(address: &str) -> Result<Arc<dyn HostsSource>> {
    if let Some(path) = address.strip_prefix("file://") {
        return Ok(Arc::new(FileHostsSource::new(path)));
    }
    if address.starts_with("http://") || address.starts_with("https://") {
        return Ok(Arc::new(HttpHostsSource::new(address)?));
    }
    Err(Error::InvalidConfig(format!(
        "unsupported coordination address: {}",
        address
    )))
}

/// Reads `host:port` lines from a file; `#` starts a comment
pub struct FileHostsSource {
    path: PathBuf,
}

impl FileHostsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HostsSource for FileHostsSource {
    async fn fetch(&self) -> Result<Vec<Host>> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::HostSource(format!("{}: {}", self.path.display(), e)))?;

        contents
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default().trim())
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse()
                    .map_err(|e| Error::HostSource(format!("{}: {}", self.path.display(), e)))
            })
            .collect()
    }
}

/// GETs a JSON array of `{"hostname": .., "port": ..}` from the coordination service
pub struct HttpHostsSource {
    client: reqwest::Client,
    url: String,
}

impl HttpHostsSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_SOURCE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl HostsSource for HttpHostsSource {
    async fn fetch(&self) -> Result<Vec<Host>> {
        let hosts = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Host>>()
            .await?;
        Ok(hosts)
    }
}

/// In-process source whose answer is set by the caller
#[derive(Default)]
pub struct StaticHostsSource {
    hosts: Mutex<Option<Vec<Host>>>,
}

impl StaticHostsSource {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self {
            hosts: Mutex::new(Some(hosts)),
        }
    }

    pub fn set_hosts(&self, hosts: Vec<Host>) {
        *self.hosts.lock().unwrap_or_else(PoisonError::into_inner) = Some(hosts);
    }

    /// Make subsequent fetches fail until `set_hosts` is called again
    pub fn set_unavailable(&self) {
        *self.hosts.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait]
impl HostsSource for StaticHostsSource {
    async fn fetch(&self) -> Result<Vec<Host>> {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::HostSource("source unavailable".into()))
    }
}

/// What one reload did to the live host set
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadOutcome {
    /// New set accepted and checkpointed
    Accepted { hosts: usize, dropped: f64 },
    /// Source returned the current set
    Unchanged,
    /// Too many hosts missing; previous set kept
    Rejected { dropped: f64 },
    /// Source failed; previous set kept
    SourceFailed,
}

/// Host reloader with a drop-fraction guard and an on-disk checkpoint
pub struct CheckpointedHostsReloader {
    source: Arc<dyn HostsSource>,
    checkpoint: PathBuf,
    drop_threshold: f64,
    current: RwLock<Arc<LiveHostSet>>,
}

impl CheckpointedHostsReloader {
    /// Create a reloader seeded from the checkpoint file, if one exists
    pub fn new(
        source: Arc<dyn HostsSource>,
        checkpoint: impl Into<PathBuf>,
        drop_threshold: f64,
    ) -> Self {
        let checkpoint = checkpoint.into();
        let initial = match load_checkpoint(&checkpoint) {
            Ok(Some(hosts)) => {
                tracing::info!(
                    "Loaded {} hosts from checkpoint {}",
                    hosts.len(),
                    checkpoint.display()
                );
                hosts
            }
            Ok(None) => LiveHostSet::default(),
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable host checkpoint {}: {}",
                    checkpoint.display(),
                    e
                );
                LiveHostSet::default()
            }
        };

        Self {
            source,
            checkpoint,
            drop_threshold,
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Current live host set
    pub fn hosts(&self) -> Arc<LiveHostSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Poll the source once and apply the drop guard.
    ///
    /// Source failures and rejected polls are logged and absorbed here.
    pub async fn reload(&self) -> ReloadOutcome {
        let fetched = match self.source.fetch().await {
            Ok(hosts) => hosts,
            Err(e) => {
                tracing::warn!("Host reload failed, keeping previous hosts: {}", e);
                return ReloadOutcome::SourceFailed;
            }
        };
        let candidate: BTreeSet<Host> = fetched.into_iter().collect();

        let previous = self.hosts();
        if previous.hosts == candidate {
            return ReloadOutcome::Unchanged;
        }

        let dropped = previous.drop_fraction(&candidate);
        if dropped > self.drop_threshold {
            tracing::warn!(
                previous = previous.len(),
                fetched = candidate.len(),
                "Host reload would drop {:.1}% of hosts (threshold {:.1}%), keeping previous hosts",
                dropped * 100.0,
                self.drop_threshold * 100.0
            );
            return ReloadOutcome::Rejected { dropped };
        }

        let next = Arc::new(LiveHostSet {
            hosts: candidate,
            loaded_at: timestamp_now_millis(),
        });
        if let Err(e) = save_checkpoint(&self.checkpoint, &next).await {
            tracing::warn!(
                "Failed to write host checkpoint {}: {}",
                self.checkpoint.display(),
                e
            );
        }

        tracing::info!(
            previous = previous.len(),
            current = next.len(),
            "Host set updated"
        );
        let hosts = next.len();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
        ReloadOutcome::Accepted { hosts, dropped }
    }

    pub async fn shutdown(&self) {
        self.source.shutdown().await;
    }
}

fn load_checkpoint(path: &Path) -> Result<Option<LiveHostSet>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn save_checkpoint(path: &Path, hosts: &LiveHostSet) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(hosts)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
