//! Error types for shardmaster

use crate::rpc::protocol::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Store Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store schema mismatch: expected version {expected}, found {found}")]
    SchemaMismatch { expected: u32, found: u32 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    // === Lookup Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Assignment is stale: {0}")]
    Stale(String),

    // === Collaborator Errors ===
    #[error("Host source error: {0}")]
    HostSource(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    // === Protocol Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Runtime Errors ===
    #[error("Worker pool is shut down")]
    PoolShutdown,

    #[error("A refresh cycle is already running")]
    RefreshInProgress,

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Unavailable(_)
                | Error::Timeout(_)
                | Error::HostSource(_)
                | Error::Stale(_)
        )
    }

    /// Convert to the error code carried in RPC responses
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Stale(_) => ErrorCode::Stale,
            Error::InvalidRequest(_) | Error::FrameTooLarge { .. } | Error::Protocol(_) => {
                ErrorCode::InvalidRequest
            }
            Error::Unavailable(_)
            | Error::RocksDb(_)
            | Error::Io(_)
            | Error::Timeout(_)
            | Error::PoolShutdown => ErrorCode::Unavailable,
            _ => ErrorCode::Internal,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::HostSource(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::NotFound("x".into()).to_error_code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            Error::InvalidRequest("bad".into()).to_error_code(),
            ErrorCode::InvalidRequest
        );
        assert_eq!(
            Error::Unavailable("down".into()).to_error_code(),
            ErrorCode::Unavailable
        );
        assert_eq!(
            Error::Internal("boom".into()).to_error_code(),
            ErrorCode::Internal
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Unavailable("x".into()).is_retryable());
        assert!(!Error::InvalidRequest("x".into()).is_retryable());
        assert!(!Error::InvalidConfig("x".into()).is_retryable());
    }
}
