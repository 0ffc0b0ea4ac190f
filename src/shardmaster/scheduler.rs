//! Periodic task scheduling
//!
//! Every job gets its own ticker task and its own cancellation handle, so
//! cancelling one job never affects another. Jobs of one [`Scheduler`] share a
//! trigger lock: no two of its ticks run at the same time. Jobs that start long
//! work should spawn it and return.

use crate::common::{Error, Result};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Cancellation handle for one scheduled job
#[derive(Clone)]
pub struct TaskHandle {
    name: Arc<str>,
    cancel: Arc<watch::Sender<bool>>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop future ticks; a tick already running completes
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

pub struct Scheduler {
    trigger_lock: Arc<tokio::sync::Mutex<()>>,
    tasks: Mutex<Vec<(TaskHandle, JoinHandle<()>)>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            trigger_lock: Arc::new(tokio::sync::Mutex::new(())),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Run `job` every `period`, first after one full period
    pub fn schedule<F, Fut>(&self, name: &str, period: Duration, job: F) -> TaskHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let handle = TaskHandle {
            name: Arc::from(name),
            cancel: Arc::new(cancel_tx),
        };
        let trigger_lock = self.trigger_lock.clone();
        let task_name = handle.name.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => break,
                    _ = ticker.tick() => {
                        if *cancel_rx.borrow() {
                            break;
                        }
                        let _serial = trigger_lock.lock().await;
                        job().await;
                    }
                }
            }
            tracing::debug!(task = %task_name, "Scheduled task stopped");
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((handle.clone(), join));
        handle
    }

    /// Cancel every job and wait up to `timeout` for running ticks to finish
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for (handle, _) in &tasks {
            handle.cancel();
        }

        let mut stuck = Vec::new();
        for (handle, join) in tasks {
            let abort = join.abort_handle();
            if tokio::time::timeout(timeout, join).await.is_err() {
                abort.abort();
                stuck.push(handle.name().to_string());
            }
        }

        if stuck.is_empty() {
            Ok(())
        } else {
            Err(Error::Timeout(format!(
                "scheduled tasks aborted: {}",
                stuck.join(", ")
            )))
        }
    }
}
