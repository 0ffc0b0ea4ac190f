//! Request/response server
//!
//! At most `concurrency` connections are served at once; further clients wait
//! in the listen backlog until a slot frees up. Stopping refuses new
//! connections, lets open ones finish the request in hand, and aborts whatever
//! is still running when the timeout expires.

use crate::common::{Error, Result};
use crate::rpc::handler::MultiplexingRequestHandler;
use crate::rpc::protocol::{decode, read_frame, send, ErrorCode, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

pub struct RequestResponseServer {
    listener: TcpListener,
    handler: Arc<MultiplexingRequestHandler>,
    concurrency: usize,
}

impl RequestResponseServer {
    /// Bind `addr`; port 0 picks an ephemeral port
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<MultiplexingRequestHandler>,
        concurrency: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handler,
            concurrency: concurrency.max(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn spawn(self) -> Result<RunningServer> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tracing::info!(
            concurrency = self.concurrency,
            "Assignment RPC server listening on {}",
            local_addr
        );
        let join = tokio::spawn(self.accept_loop(shutdown_rx));
        Ok(RunningServer {
            local_addr,
            shutdown: shutdown_tx,
            join,
        })
    }

    async fn accept_loop(self, mut shutdown: watch::Receiver<bool>) -> JoinSet<()> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut connections = JoinSet::new();

        loop {
            while let Some(done) = connections.try_join_next() {
                if let Err(e) = done {
                    tracing::error!("Connection task failed: {}", e);
                }
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            let handler = self.handler.clone();
            let shutdown = shutdown.clone();
            connections.spawn(async move {
                let _permit = permit;
                if let Err(e) = serve_connection(stream, handler, shutdown).await {
                    tracing::debug!(peer = %peer, "Connection closed: {}", e);
                }
            });
        }

        connections
    }
}

async fn serve_connection(
    stream: TcpStream,
    handler: Arc<MultiplexingRequestHandler>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let (mut reader, writer) = stream.into_split();
    let mut writer = BufWriter::new(writer);

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.changed() => return Ok(()),
            frame = read_frame(&mut reader) => frame,
        };

        let payload = match frame {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(()),
            Err(e @ Error::FrameTooLarge { .. }) => {
                // Framing is lost after an oversized header: answer, then hang up
                send(&mut writer, &Response::error(&e)).await?;
                writer.flush().await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let responses = match decode::<Request>(&payload) {
            Ok(request) => handler.handle(request).await,
            Err(e) => vec![Response::Error {
                code: ErrorCode::InvalidRequest,
                message: format!("undecodable request: {}", e),
            }],
        };

        for response in &responses {
            if let Err(e) = send(&mut writer, response).await {
                if let Error::FrameTooLarge { .. } = e {
                    send(&mut writer, &Response::error(&Error::Internal(e.to_string()))).await?;
                    break;
                }
                return Err(e);
            }
        }
        writer.flush().await?;
    }
}

/// Handle to a spawned server
pub struct RunningServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<JoinSet<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, then wait up to `timeout` for open connections
    pub async fn stop(self, timeout: Duration) -> Result<()> {
        self.shutdown.send_replace(true);
        let mut connections = self
            .join
            .await
            .map_err(|e| Error::Internal(format!("accept loop failed: {}", e)))?;

        let open = connections.len();
        let drained = tokio::time::timeout(timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => {
                tracing::info!(open, "Assignment RPC server stopped");
                Ok(())
            }
            Err(_) => {
                let aborted = connections.len();
                connections.abort_all();
                Err(Error::Timeout(format!(
                    "aborted {} RPC connections after {:?}",
                    aborted, timeout
                )))
            }
        }
    }
}
