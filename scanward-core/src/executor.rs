use std::{fmt, path::PathBuf, sync::Arc};

use tracing::{error, info, warn};

use crate::events::EventNotifier;
use crate::job::{self, ExecutionOutcome, JobId, ScanJob};
use crate::result::parse_scan_output;
use crate::runner::{ScanInvocation, ScanRunner};
use crate::store::JobStore;

/// Drives one job from `starting` to a terminal state.
///
/// Nothing raised while running the scanner escapes `execute`; every
/// failure ends up in the job record.
#[derive(Clone)]
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    runner: Arc<dyn ScanRunner>,
    notifier: Arc<EventNotifier>,
    output_dir: PathBuf,
}

impl fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecutor")
            .field("runner", &self.runner)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: Arc<dyn ScanRunner>,
        notifier: Arc<EventNotifier>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            runner,
            notifier,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_path(&self, id: &JobId) -> PathBuf {
        self.output_dir.join(format!("masscan_{id}.json"))
    }

    pub async fn execute(&self, id: &JobId) {
        let mut job = match self.store.get(id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %id, "scan job vanished before execution");
                return;
            }
            Err(err) => {
                error!(job_id = %id, error = %err, "failed to load scan job");
                return;
            }
        };

        if let Err(err) = job.mark_running() {
            warn!(job_id = %id, error = %err, "scan job not runnable");
            return;
        }

        if let Err(err) = self.store.save(&job).await {
            error!(job_id = %id, error = %err, "failed to persist running state");
            let reason = format!("Failed to persist running state: {err}");
            self.finish(&mut job, ExecutionOutcome::Failed(reason)).await;
            return;
        }
        self.notifier.publish(&job.id, job.state, None);

        info!(
            job_id = %id,
            target_spec = %job.target_spec,
            port_spec = %job.port_spec,
            rate = job.rate,
            "scan started"
        );

        let outcome = self.run_scan(&job).await;
        self.finish(&mut job, outcome).await;
    }

    /// Runs the scanner and turns its exit status and output document into
    /// an outcome. The output file is removed on every path.
    async fn run_scan(&self, job: &ScanJob) -> ExecutionOutcome {
        let invocation = ScanInvocation {
            job_id: job.id.clone(),
            target_spec: job.target_spec.clone(),
            port_spec: job.port_spec.clone(),
            rate: job.rate,
            output_path: self.output_path(&job.id),
        };

        let outcome = match self.runner.run(&invocation).await {
            Ok(output) => {
                info!(
                    job_id = %job.id,
                    exit_code = ?output.exit_code,
                    elapsed = %humantime::format_duration(output.elapsed),
                    "scanner exited"
                );
                if output.success() {
                    Self::read_results(&invocation).await
                } else {
                    ExecutionOutcome::Failed(format!(
                        "Masscan error: {}",
                        output.stderr
                    ))
                }
            }
            Err(err) => ExecutionOutcome::Failed(err.to_string()),
        };

        Self::remove_output(&invocation).await;
        outcome
    }

    async fn read_results(invocation: &ScanInvocation) -> ExecutionOutcome {
        let parsed = match tokio::fs::read_to_string(&invocation.output_path)
            .await
        {
            Ok(raw) => parse_scan_output(&raw).map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };

        match parsed {
            Ok(hosts) => ExecutionOutcome::Completed(hosts),
            Err(detail) => ExecutionOutcome::Failed(format!(
                "Error reading scan results: {detail}"
            )),
        }
    }

    async fn remove_output(invocation: &ScanInvocation) {
        match tokio::fs::remove_file(&invocation.output_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                job_id = %invocation.job_id,
                path = %invocation.output_path.display(),
                error = %err,
                "failed to remove scan output"
            ),
        }
    }

    async fn finish(&self, job: &mut ScanJob, outcome: ExecutionOutcome) {
        if let Err(err) = job.finish(outcome, job::now()) {
            error!(job_id = %job.id, error = %err, "invalid terminal transition");
            return;
        }

        match &job.failure_reason {
            Some(reason) => error!(job_id = %job.id, reason = %reason, "scan failed"),
            None => info!(
                job_id = %job.id,
                hosts = job.result.as_ref().map_or(0, Vec::len),
                "scan completed"
            ),
        }

        if let Err(err) = self.store.save(job).await {
            error!(job_id = %job.id, error = %err, "failed to persist terminal state");
        }

        self.notifier
            .publish(&job.id, job.state, job.failure_reason.as_deref());
    }
}
