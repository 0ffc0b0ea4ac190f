//! # shardmaster
//!
//! Decides which index-serving hosts hold replicas of which dataset shards,
//! keeps that decision current as shards and hosts come and go, and answers
//! placement queries over a small RPC protocol:
//! - Shard discovery over a dataset directory tree
//! - Live-host tracking with a drop guard and an on-disk checkpoint
//! - Rendezvous (HRW) replica placement, minimal movement on host changes
//! - Durable assignment table in RocksDB with staleness tracking
//! - Bounded-concurrency, batched assignment RPC

#![allow(clippy::result_large_err)]
//!
//! ## Architecture
//!
//! ```text
//!  host source ──► CheckpointedHostsReloader ─┐
//!                                              ▼
//!  dataset tree ──► ShardDiscovery ──► Refresher ──► ShardAssigner (HRW)
//!                                              │
//!                                              ▼
//!                                     AssignmentStore (RocksDB)
//!                                              │
//!                                              ▼
//!              clients ◄── RequestResponseServer ◄── ShardMaster
//! ```
//!
//! ## Usage
//!
//! ### Start a shard master
//! ```bash
//! shardmaster serve \
//!   --config ./shardmaster.toml \
//!   --coordination-address file:///etc/shardmaster/hosts \
//!   --hosts-file ./hosts.checkpoint \
//!   --db ./assignments \
//!   --port 7000
//! ```
//!
//! ### Query it
//! ```bash
//! shardmaster-cli --addr 127.0.0.1:7000 datasets
//! shardmaster-cli --addr 127.0.0.1:7000 dataset orders
//! shardmaster-cli --addr 127.0.0.1:7000 shard orders s00001
//! shardmaster-cli --addr 127.0.0.1:7000 host daemon-1:9000
//! ```

pub mod common;
pub mod rpc;
pub mod shardmaster;

// Re-export commonly used types
pub use common::{Assignment, Error, Host, Result, ShardId, ShardMasterConfig};
pub use rpc::ShardMasterClient;
pub use shardmaster::{RunningShardMaster, ShardMasterDaemon};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
