//! Role Cache Populator
//!
//! Background writer for the role cache. Role listing hands its default-role
//! mapping to a bounded queue and returns immediately; a single worker task
//! drains the queue and writes each batch under its own timeout, detached
//! from the request that produced it.
//!
//! Failures never reach the caller. A full or closed queue drops the batch,
//! a failed or timed-out write is logged, and both are counted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::role::cache::RoleCache;
use crate::role::entity::RoleKey;
use crate::shared::metrics;

/// One batch of `role uuid -> role key` entries.
pub type PopulationJob = HashMap<String, RoleKey>;

#[derive(Debug, Clone, Copy)]
pub struct PopulatorConfig {
    /// Batches that may wait behind the one being written
    pub queue_capacity: usize,
    /// Upper bound for a single `set_bulk` call
    pub task_timeout: Duration,
}

impl Default for PopulatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            task_timeout: Duration::from_millis(2000),
        }
    }
}

pub struct RoleCachePopulator {
    sender: Mutex<Option<mpsc::Sender<PopulationJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RoleCachePopulator {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(cache: Arc<dyn RoleCache>, config: PopulatorConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let worker = tokio::spawn(run_worker(cache, receiver, config.task_timeout));

        info!(
            queue_capacity = config.queue_capacity,
            task_timeout_ms = config.task_timeout.as_millis() as u64,
            "Role cache populator started"
        );

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a batch without waiting. Returns whether it was accepted.
    pub fn submit(&self, job: PopulationJob) -> bool {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            warn!(entries = job.len(), "Role cache populator is shut down, dropping batch");
            metrics::record_cache_population_dropped("closed");
            return false;
        };

        match sender.try_send(job) {
            Ok(()) => {
                metrics::record_cache_population_enqueued();
                true
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(entries = job.len(), "Role cache population queue full, dropping batch");
                metrics::record_cache_population_dropped("queue_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(entries = job.len(), "Role cache population worker gone, dropping batch");
                metrics::record_cache_population_dropped("closed");
                false
            }
        }
    }

    /// Stop accepting batches and wait until the queued ones are written.
    pub async fn shutdown(&self) {
        // Dropping the only sender ends the worker loop once the queue drains
        drop(self.sender.lock().take());

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Role cache populator worker ended abnormally");
            }
        }

        info!("Role cache populator stopped");
    }
}

async fn run_worker(
    cache: Arc<dyn RoleCache>,
    mut receiver: mpsc::Receiver<PopulationJob>,
    task_timeout: Duration,
) {
    while let Some(job) = receiver.recv().await {
        let entries = job.len();
        let started = Instant::now();

        match tokio::time::timeout(task_timeout, cache.set_bulk(job)).await {
            Ok(Ok(())) => {
                debug!(entries, "Role cache populated");
                metrics::record_cache_population_completed(entries, started.elapsed());
            }
            Ok(Err(e)) => {
                warn!(entries, error = %e, "Role cache population failed");
                metrics::record_cache_population_failed("error");
            }
            Err(_) => {
                warn!(
                    entries,
                    timeout_ms = task_timeout.as_millis() as u64,
                    "Role cache population timed out"
                );
                metrics::record_cache_population_failed("timeout");
            }
        }
    }
}
