//! Request dispatch

use crate::common::{validate_dataset, validate_shard, Assignment, Result};
use crate::rpc::protocol::{Request, Response};
use crate::shardmaster::master::ShardMaster;
use std::sync::Arc;

/// Routes each request kind to the [`ShardMaster`] and splits listings into batches
pub struct MultiplexingRequestHandler {
    master: Arc<dyn ShardMaster>,
    batch_size: usize,
}

impl MultiplexingRequestHandler {
    pub fn new(master: Arc<dyn ShardMaster>, batch_size: usize) -> Self {
        Self {
            master,
            batch_size: batch_size.max(1),
        }
    }

    /// Frames to send back for `request`, in order
    pub async fn handle(&self, request: Request) -> Vec<Response> {
        let kind = request.kind();
        match self.dispatch(request).await {
            Ok(responses) => responses,
            Err(e) => {
                tracing::debug!(kind, "Request failed: {}", e);
                vec![Response::error(&e)]
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Vec<Response>> {
        match request {
            Request::ListDatasets => Ok(vec![Response::Datasets {
                datasets: self.master.datasets().await?,
            }]),
            Request::GetDatasetAssignments { dataset } => {
                validate_dataset(&dataset)?;
                Ok(self.batches(self.master.dataset_assignments(&dataset).await?))
            }
            Request::GetShardAssignment { dataset, shard } => {
                validate_dataset(&dataset)?;
                validate_shard(&shard)?;
                let assignment = self.master.shard_assignment(&dataset, &shard).await?;
                Ok(vec![Response::Batch {
                    assignments: vec![assignment],
                    last: true,
                }])
            }
            Request::GetHostAssignments { host } => {
                Ok(self.batches(self.master.host_assignments(&host).await?))
            }
        }
    }

    fn batches(&self, assignments: Vec<Assignment>) -> Vec<Response> {
        if assignments.is_empty() {
            return vec![Response::Batch {
                assignments,
                last: true,
            }];
        }

        let chunks: Vec<Vec<Assignment>> = assignments
            .chunks(self.batch_size)
            .map(<[Assignment]>::to_vec)
            .collect();
        let count = chunks.len();
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, assignments)| Response::Batch {
                assignments,
                last: i + 1 == count,
            })
            .collect()
    }
}
