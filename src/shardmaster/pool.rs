//! Bounded worker pool with blocking submission
//!
//! `submit` waits for a free worker instead of queueing without bound, so a
//! burst of refresh work pushes back on its producer rather than piling up
//! tasks and store connections.

use crate::common::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub struct BlockingPool {
    name: &'static str,
    permits: Arc<Semaphore>,
    size: usize,
    closed: AtomicBool,
}

impl BlockingPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name,
            permits: Arc::new(Semaphore::new(size)),
            size,
            closed: AtomicBool::new(false),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently running a task
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Wait for a free worker, then run `task` on it
    pub async fn submit<F, T>(&self, task: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PoolShutdown);
        }
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolShutdown)?;

        Ok(tokio::spawn(async move {
            let _permit = permit;
            task.await
        }))
    }

    /// Stop accepting work and wait up to `timeout` for running tasks to finish
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let drained = tokio::time::timeout(timeout, self.permits.acquire_many(self.size as u32)).await;
        self.permits.close();
        match drained {
            Ok(_) => {
                tracing::debug!(pool = self.name, "Worker pool drained");
                Ok(())
            }
            Err(_) => Err(Error::Timeout(format!(
                "{} pool still had {} busy workers after {:?}",
                self.name,
                self.busy(),
                timeout
            ))),
        }
    }
}
