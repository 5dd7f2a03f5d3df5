//! Facade over admission, status queries, retention and event fan-out.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{Mutex, broadcast},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{OrchestratorConfig, RetentionPolicy, ScannerSettings};
use crate::dispatcher::{DispatcherStats, JobDispatcher};
use crate::error::{OrchestratorError, Result};
use crate::events::{EventNotifier, ScanEvent};
use crate::executor::JobExecutor;
use crate::job::{self, JobId, ScanJob, ScanState, ScanSummary};
use crate::runner::ScanRunner;
use crate::store::{JobStore, retention_cutoff};
use crate::validation::ScanRequest;

pub const INTERRUPTED_REASON: &str = "Interrupted by service restart";

/// Result of reconciling unfinished jobs at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub interrupted: usize,
}

/// Gauges reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub dispatcher: DispatcherStats,
    pub subscribers: usize,
}

pub struct ScanOrchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    notifier: Arc<EventNotifier>,
    dispatcher: JobDispatcher,
    pool_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl ScanOrchestrator {
    /// Wires the notifier, executor and worker pool, then reconciles jobs
    /// left unfinished by a previous instance. Returns without waiting for
    /// recovered jobs to fit in the queue.
    pub async fn start(
        config: OrchestratorConfig,
        scanner: &ScannerSettings,
        store: Arc<dyn JobStore>,
        runner: Arc<dyn ScanRunner>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let notifier = Arc::new(EventNotifier::new(config.event_capacity));
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&store),
            runner,
            Arc::clone(&notifier),
            scanner.output_dir.clone(),
        ));
        let (dispatcher, pool_handle) = JobDispatcher::spawn(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&notifier),
            executor,
            shutdown.clone(),
        );

        let orchestrator = Self {
            config,
            store,
            notifier,
            dispatcher,
            pool_handle: Mutex::new(Some(pool_handle)),
            shutdown,
        };

        let report = orchestrator.recover().await?;
        if report != RecoveryReport::default() {
            info!(
                requeued = report.requeued,
                interrupted = report.interrupted,
                "recovered unfinished scans"
            );
        }

        Ok(orchestrator)
    }

    /// `running` jobs lost their scanner process with the previous instance
    /// and are failed; `starting` jobs never ran and are queued again in
    /// the background.
    async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut requeue = Vec::new();

        for mut job in self.store.list_unfinished().await? {
            match job.state {
                ScanState::Starting => requeue.push(job.id),
                ScanState::Running => {
                    job.fail(INTERRUPTED_REASON, job::now())?;
                    self.store.save(&job).await?;
                    self.notifier.publish(
                        &job.id,
                        job.state,
                        job.failure_reason.as_deref(),
                    );
                    warn!(job_id = %job.id, "scan interrupted by restart");
                    report.interrupted += 1;
                }
                ScanState::Completed | ScanState::Failed => {}
            }
        }

        report.requeued = requeue.len();
        self.dispatcher.requeue(requeue);
        Ok(report)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn submit(&self, request: &ScanRequest) -> Result<JobId> {
        self.dispatcher.submit(request).await
    }

    pub async fn status(&self, id: &JobId) -> Result<ScanJob> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    /// Newest first. `limit` falls back to the configured default and is
    /// capped by it.
    pub async fn recent(&self, limit: Option<usize>) -> Result<Vec<ScanSummary>> {
        let limit = limit
            .unwrap_or(self.config.recent_limit)
            .min(self.config.recent_limit);
        let jobs = self.store.recent(limit).await?;
        Ok(jobs.iter().map(ScanJob::summary).collect())
    }

    /// Deletes every job started strictly before `older_than`.
    pub async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let removed = self.store.delete_started_before(older_than).await?;
        info!(removed, cutoff = %older_than, "retention cleanup finished");
        Ok(removed)
    }

    pub async fn cleanup_older_than(&self, max_age: Duration) -> Result<u64> {
        self.cleanup(retention_cutoff(max_age)?).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.notifier.subscribe()
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            dispatcher: self.dispatcher.stats(),
            subscribers: self.notifier.subscriber_count(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops taking queued jobs and waits for running scans to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        if let Some(handle) = self.pool_handle.lock().await.take() {
            if let Err(err) = handle.await {
                error!(error = %err, "scan worker pool task failed");
            }
        }

        self.dispatcher.drain().await;
        info!("scan orchestrator stopped");
    }
}

/// Runs retention cleanup every `policy.interval` until `shutdown` fires.
pub fn spawn_retention_worker(
    orchestrator: Arc<ScanOrchestrator>,
    policy: RetentionPolicy,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            max_age = %humantime::format_duration(policy.max_age),
            interval = %humantime::format_duration(policy.interval),
            "retention worker started"
        );

        if policy.run_on_startup {
            if let Err(err) = orchestrator.cleanup_older_than(policy.max_age).await
            {
                error!(error = %err, "initial retention cleanup failed");
            }
        }

        let period = policy.interval.max(Duration::from_secs(1));
        let mut interval =
            tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) =
                        orchestrator.cleanup_older_than(policy.max_age).await
                    {
                        error!(error = %err, "periodic retention cleanup failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("retention worker shutting down");
                    break;
                }
            }
        }
    })
}
