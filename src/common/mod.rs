//! Common utilities and types shared across shardmaster

pub mod config;
pub mod error;
pub mod hash;
pub mod types;
pub mod utils;

pub use config::ShardMasterConfig;
pub use error::{Error, Result};
pub use hash::{hrw_rank, hrw_score, select_replicas};
pub use types::{Assignment, Host, LiveHostSet, ShardId};
pub use utils::{
    format_timestamp_millis, parse_duration, parse_duration_millis, timestamp_now_millis,
    validate_dataset, validate_shard,
};
