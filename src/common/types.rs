//! Core value types: hosts, shard ids, assignments

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Minimum number of digits in a shard directory version suffix
/// (`yyyyMMddHHmmss`).
const VERSION_MIN_DIGITS: usize = 14;

/// A replica-serving host. Identity is the (hostname, port) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Host {
    pub hostname: String,
    pub port: u16,
}

impl Host {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

impl FromStr for Host {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        let (hostname, port) = s
            .rsplit_once(':')
            .ok_or_else(|| crate::Error::InvalidRequest(format!("missing port in host: {}", s)))?;
        if hostname.is_empty() {
            return Err(crate::Error::InvalidRequest(format!(
                "empty hostname in host: {}",
                s
            )));
        }
        let port = port
            .parse()
            .map_err(|_| crate::Error::InvalidRequest(format!("invalid port in host: {}", s)))?;
        Ok(Host::new(hostname, port))
    }
}

/// Identifies one shard of a dataset.
///
/// `version` is the build version parsed from the shard directory name, if any.
/// Placement ignores it so a rebuilt shard keeps its hosts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId {
    pub dataset: String,
    pub shard: String,
    pub version: Option<u64>,
}

impl ShardId {
    pub fn new(dataset: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            shard: shard.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Parse a shard directory name such as `index20240101.00-20240102.00.20240103120000`
    /// into shard `index20240101.00-20240102.00` and version `20240103120000`.
    pub fn from_dir_name(dataset: &str, dir_name: &str) -> Self {
        if let Some((shard, suffix)) = dir_name.rsplit_once('.') {
            if !shard.is_empty()
                && suffix.len() >= VERSION_MIN_DIGITS
                && suffix.bytes().all(|b| b.is_ascii_digit())
            {
                if let Ok(version) = suffix.parse() {
                    return ShardId::new(dataset, shard).with_version(version);
                }
            }
        }
        ShardId::new(dataset, dir_name)
    }

    /// Bytes fed to the placement hash: dataset and shard name, not the version.
    pub fn placement_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.dataset.len() + self.shard.len() + 1);
        key.extend_from_slice(self.dataset.as_bytes());
        key.push(0);
        key.extend_from_slice(self.shard.as_bytes());
        key
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}/{}.{}", self.dataset, self.shard, v),
            None => write!(f, "{}/{}", self.dataset, self.shard),
        }
    }
}

/// Replica placement of one shard as of its last successful refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub shard: ShardId,
    pub replicas: Vec<Host>,
    /// Unix millis of the refresh that wrote this assignment
    pub timestamp: u64,
}

impl Assignment {
    pub fn is_unassigned(&self) -> bool {
        self.replicas.is_empty()
    }
}

/// Checkpointed view of reachable hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveHostSet {
    pub hosts: BTreeSet<Host>,
    /// Unix millis of the reload that produced this set
    pub loaded_at: u64,
}

impl LiveHostSet {
    pub fn new(hosts: impl IntoIterator<Item = Host>, loaded_at: u64) -> Self {
        Self {
            hosts: hosts.into_iter().collect(),
            loaded_at,
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Fraction of this set missing from `candidate`. Zero when this set is empty.
    pub fn drop_fraction(&self, candidate: &BTreeSet<Host>) -> f64 {
        if self.hosts.is_empty() {
            return 0.0;
        }
        let dropped = self.hosts.difference(candidate).count();
        dropped as f64 / self.hosts.len() as f64
    }
}
