//! Launching the external scanner.

use std::{
    fmt,
    path::PathBuf,
    process::Stdio,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::ScannerSettings;
use crate::job::JobId;

/// Everything the scanner needs to run one job.
#[derive(Debug, Clone)]
pub struct ScanInvocation {
    pub job_id: JobId,
    pub target_spec: String,
    pub port_spec: String,
    pub rate: u32,
    /// Private path the scanner writes its JSON document to.
    pub output_path: PathBuf,
}

impl ScanInvocation {
    /// Scanner arguments, without the program and its leading arguments.
    pub fn scan_args(&self) -> Vec<String> {
        vec![
            self.target_spec.clone(),
            "-p".to_string(),
            self.port_spec.clone(),
            "--rate".to_string(),
            self.rate.to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--output".to_string(),
            self.output_path.display().to_string(),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for scanner: {0}")]
    Wait(#[source] std::io::Error),
    #[error("Scan timed out after {}", humantime::format_duration(*.0))]
    TimedOut(Duration),
}

/// Runs the scanner to completion for one invocation.
#[async_trait]
pub trait ScanRunner: Send + Sync + fmt::Debug {
    async fn run(
        &self,
        invocation: &ScanInvocation,
    ) -> Result<ProcessOutput, RunnerError>;
}

/// Spawns masscan (or a compatible program) as a child process.
#[derive(Debug, Clone)]
pub struct MasscanRunner {
    program: String,
    leading_args: Vec<String>,
    timeout: Option<Duration>,
}

impl MasscanRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            timeout: None,
        }
    }

    pub fn from_settings(settings: &ScannerSettings) -> Self {
        Self {
            program: settings.program.clone(),
            leading_args: settings.leading_args.clone(),
            timeout: settings.timeout,
        }
    }

    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, invocation: &ScanInvocation) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .args(invocation.scan_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ScanRunner for MasscanRunner {
    async fn run(
        &self,
        invocation: &ScanInvocation,
    ) -> Result<ProcessOutput, RunnerError> {
        debug!(
            job_id = %invocation.job_id,
            program = %self.program,
            args = ?invocation.scan_args(),
            "spawning scanner"
        );

        let start = Instant::now();
        let child = self
            .command(invocation)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match self.timeout {
            Some(limit) => {
                tokio::time::timeout(limit, child.wait_with_output())
                    .await
                    .map_err(|_| RunnerError::TimedOut(limit))?
            }
            None => child.wait_with_output().await,
        }
        .map_err(RunnerError::Wait)?;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            elapsed: start.elapsed(),
        })
    }
}
