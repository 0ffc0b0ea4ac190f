//! Shard master role: discovery, host tracking, placement, persistence and
//! the daemon tying them together

pub mod assigner;
pub mod daemon;
pub mod discovery;
pub mod hosts;
pub mod http;
pub mod master;
pub mod pool;
pub mod refresher;
pub mod scheduler;
pub mod store;

pub use assigner::{MinHashShardAssigner, ShardAssigner};
pub use daemon::{Collaborators, RunningShardMaster, ShardMasterDaemon};
pub use discovery::{AcceptAll, DatasetAllowList, LocalDirDiscovery, ShardDiscovery, ShardFilter};
pub use hosts::{
    CheckpointedHostsReloader, FileHostsSource, HostsSource, HttpHostsSource, ReloadOutcome,
    StaticHostsSource,
};
pub use master::{ShardMaster, StoreShardMaster};
pub use pool::BlockingPool;
pub use refresher::{DatasetShardAssignmentRefresher, Readiness, RefreshReport};
pub use scheduler::{Scheduler, TaskHandle};
pub use store::{AssignmentStore, MemoryAssignmentStore, RocksAssignmentStore, StorePool};
