//! Assignment query RPC: wire protocol, dispatch, server and client

pub mod client;
pub mod handler;
pub mod protocol;
pub mod server;

pub use client::ShardMasterClient;
pub use handler::MultiplexingRequestHandler;
pub use protocol::{ErrorCode, Request, Response, MAX_FRAME_SIZE};
pub use server::{RequestResponseServer, RunningServer};
