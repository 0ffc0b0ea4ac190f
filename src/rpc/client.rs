//! Assignment RPC client

use crate::common::{Assignment, Error, Host, Result};
use crate::rpc::protocol::{decode, read_frame, send, Request, Response};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

/// One connection to a shard master; requests are sent in turn
pub struct ShardMasterClient {
    reader: OwnedReadHalf,
    writer: BufWriter<OwnedWriteHalf>,
}

impl ShardMasterClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Unavailable(format!("connect failed: {}", e)))?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader,
            writer: BufWriter::new(writer),
        })
    }

    pub async fn datasets(&mut self) -> Result<Vec<String>> {
        self.request(&Request::ListDatasets).await?;
        match self.next_response().await? {
            Response::Datasets { datasets } => Ok(datasets),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn dataset_assignments(&mut self, dataset: &str) -> Result<Vec<Assignment>> {
        self.request(&Request::GetDatasetAssignments {
            dataset: dataset.to_string(),
        })
        .await?;
        self.collect_batches().await
    }

    pub async fn shard_assignment(&mut self, dataset: &str, shard: &str) -> Result<Assignment> {
        self.request(&Request::GetShardAssignment {
            dataset: dataset.to_string(),
            shard: shard.to_string(),
        })
        .await?;
        self.collect_batches()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Protocol("empty shard response".into()))
    }

    pub async fn host_assignments(&mut self, host: &Host) -> Result<Vec<Assignment>> {
        self.request(&Request::GetHostAssignments { host: host.clone() })
            .await?;
        self.collect_batches().await
    }

    async fn request(&mut self, request: &Request) -> Result<()> {
        send(&mut self.writer, request).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn next_response(&mut self) -> Result<Response> {
        let payload = read_frame(&mut self.reader)
            .await?
            .ok_or_else(|| Error::Unavailable("connection closed by server".into()))?;
        match decode::<Response>(&payload)? {
            Response::Error { code, message } => Err(code.into_error(message)),
            response => Ok(response),
        }
    }

    async fn collect_batches(&mut self) -> Result<Vec<Assignment>> {
        let mut all = Vec::new();
        loop {
            match self.next_response().await? {
                Response::Batch { assignments, last } => {
                    all.extend(assignments);
                    if last {
                        return Ok(all);
                    }
                }
                other => return Err(unexpected(&other)),
            }
        }
    }
}

fn unexpected(response: &Response) -> Error {
    Error::Protocol(format!("unexpected response: {:?}", response))
}
