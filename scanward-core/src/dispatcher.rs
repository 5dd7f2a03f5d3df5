//! Admission and the bounded worker pool.

use std::{fmt, sync::Arc};

use tokio::{
    sync::{
        Semaphore,
        mpsc::{self, error::TrySendError},
    },
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::EventNotifier;
use crate::executor::JobExecutor;
use crate::job::{self, JobId, ScanJob};
use crate::store::JobStore;
use crate::validation::{ScanRequest, validate};

/// Snapshot of worker pool load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStats {
    pub workers: usize,
    pub in_flight: usize,
    pub queued: usize,
}

/// Validates and persists new jobs, then hands their ids to a pool of at
/// most `workers` concurrent executions through a bounded queue.
pub struct JobDispatcher {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    notifier: Arc<EventNotifier>,
    tx: mpsc::Sender<JobId>,
    executions: TaskTracker,
    recovery: TaskTracker,
    shutdown: CancellationToken,
}

impl fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("workers", &self.config.workers)
            .field("queue_capacity", &self.config.queue_capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

impl JobDispatcher {
    /// Creates the dispatcher and spawns its worker loop. The loop exits
    /// once `shutdown` is cancelled; executions already handed to a worker
    /// run to completion.
    pub fn spawn(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        notifier: Arc<EventNotifier>,
        executor: Arc<JobExecutor>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let executions = TaskTracker::new();

        let handle = tokio::spawn(run_worker_pool(
            config.workers.max(1),
            rx,
            executor,
            executions.clone(),
            shutdown.clone(),
        ));

        let dispatcher = Self {
            config,
            store,
            notifier,
            tx,
            executions,
            recovery: TaskTracker::new(),
            shutdown,
        };
        (dispatcher, handle)
    }

    /// Admits a scan request and returns its id without waiting for the
    /// scan to run.
    pub async fn submit(&self, request: &ScanRequest) -> Result<JobId> {
        let params = validate(request, &self.config.rates)?;

        if self.shutdown.is_cancelled() {
            return Err(OrchestratorError::Shutdown);
        }

        // Reserve before persisting so a full queue leaves no record behind.
        let permit = self.tx.try_reserve().map_err(|err| match err {
            TrySendError::Full(()) => OrchestratorError::QueueFull,
            TrySendError::Closed(()) => OrchestratorError::Shutdown,
        })?;

        let job = ScanJob::new(JobId::new(), &params, job::now());
        self.store.insert(&job).await?;
        self.notifier.publish(&job.id, job.state, None);

        info!(
            job_id = %job.id,
            target_spec = %job.target_spec,
            port_spec = %job.port_spec,
            rate = job.rate,
            "scan admitted"
        );

        permit.send(job.id.clone());
        Ok(job.id)
    }

    /// Feeds already persisted jobs to the pool from a background task, so
    /// the caller never waits for queue space. Ids still pending when
    /// shutdown fires stay `starting` and are picked up on the next start.
    pub fn requeue(&self, ids: Vec<JobId>) {
        if ids.is_empty() {
            return;
        }

        let tx = self.tx.clone();
        let shutdown = self.shutdown.clone();
        self.recovery.spawn(async move {
            let total = ids.len();
            for (sent, id) in ids.into_iter().enumerate() {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        warn!(
                            pending = total - sent,
                            "shutdown before recovered scans were queued"
                        );
                        return;
                    }
                    result = tx.send(id) => {
                        if result.is_err() {
                            return;
                        }
                    }
                }
            }
            debug!(total, "recovered scans queued");
        });
    }

    /// Waits for every execution handed to a worker to finish. Only
    /// meaningful after shutdown has been requested.
    pub async fn drain(&self) {
        self.recovery.close();
        self.recovery.wait().await;
        self.executions.close();
        self.executions.wait().await;
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            workers: self.config.workers.max(1),
            in_flight: self.executions.len(),
            queued: self.tx.max_capacity() - self.tx.capacity(),
        }
    }
}

async fn run_worker_pool(
    workers: usize,
    mut rx: mpsc::Receiver<JobId>,
    executor: Arc<JobExecutor>,
    executions: TaskTracker,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(workers));
    info!(workers, "scan worker pool started");

    loop {
        // Wait for a free worker before taking the next id off the queue.
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let id = tokio::select! {
            _ = shutdown.cancelled() => break,
            id = rx.recv() => match id {
                Some(id) => id,
                None => break,
            },
        };

        debug!(job_id = %id, "dispatching scan");
        let executor = Arc::clone(&executor);
        executions.spawn(async move {
            executor.execute(&id).await;
            drop(permit);
        });
    }

    if !rx.is_empty() {
        warn!(
            pending = rx.len(),
            "scan worker pool stopped with queued jobs; they resume on restart"
        );
    }
    info!("scan worker pool exiting");
}
