//! Wire protocol
//!
//! Every message is one frame: a 4-byte big-endian length followed by a
//! bincode payload. A connection carries any number of requests in turn.
//! Assignment listings come back as a run of [`Response::Batch`] frames
//! closed by one with `last = true`; a failure is a single
//! [`Response::Error`] frame.

use crate::common::{Assignment, Error, Host, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame payload
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    ListDatasets,
    GetDatasetAssignments { dataset: String },
    GetShardAssignment { dataset: String, shard: String },
    GetHostAssignments { host: Host },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::ListDatasets => "list_datasets",
            Request::GetDatasetAssignments { .. } => "get_dataset_assignments",
            Request::GetShardAssignment { .. } => "get_shard_assignment",
            Request::GetHostAssignments { .. } => "get_host_assignments",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Datasets {
        datasets: Vec<String>,
    },
    Batch {
        assignments: Vec<Assignment>,
        last: bool,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl Response {
    pub fn error(err: &Error) -> Self {
        Response::Error {
            code: err.to_error_code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotFound,
    Stale,
    InvalidRequest,
    Unavailable,
    Internal,
}

impl ErrorCode {
    /// Rebuild a client-side error from a response
    pub fn into_error(self, message: String) -> Error {
        match self {
            ErrorCode::NotFound => Error::NotFound(message),
            ErrorCode::Stale => Error::Stale(message),
            ErrorCode::InvalidRequest => Error::InvalidRequest(message),
            ErrorCode::Unavailable => Error::Unavailable(message),
            ErrorCode::Internal => Error::Internal(message),
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(message)?)
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Read one frame. `None` on a clean end of stream between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let size = u32::from_be_bytes(len) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Encode and write one message
pub async fn send<W: AsyncWrite + Unpin, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    write_frame(writer, &encode(message)?).await
}
