use std::{fmt, str::FromStr};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::result::HostRecord;
use crate::validation::ScanParameters;

/// Current time at the microsecond precision job records are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Opaque scan identifier. Fresh ids are time-ordered UUIDv7 strings, but
/// lookups accept any string.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Starting,
    Running,
    Completed,
    Failed,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Starting => "starting",
            ScanState::Running => "running",
            ScanState::Completed => "completed",
            ScanState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Completed | ScanState::Failed)
    }

    /// Whether `next` is the immediate successor of `self`.
    pub fn can_transition_to(&self, next: ScanState) -> bool {
        matches!(
            (self, next),
            (ScanState::Starting, ScanState::Running)
                | (ScanState::Running, ScanState::Completed)
                | (ScanState::Running, ScanState::Failed)
        )
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "starting" => Ok(ScanState::Starting),
            "running" => Ok(ScanState::Running),
            "completed" => Ok(ScanState::Completed),
            "failed" => Ok(ScanState::Failed),
            other => Err(format!("unknown scan state '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid scan state transition from {from} to {to}")]
pub struct TransitionError {
    pub from: ScanState,
    pub to: ScanState,
}

/// Result of running the scanner for one job.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(Vec<HostRecord>),
    Failed(String),
}

impl ExecutionOutcome {
    pub fn state(&self) -> ScanState {
        match self {
            ExecutionOutcome::Completed(_) => ScanState::Completed,
            ExecutionOutcome::Failed(_) => ScanState::Failed,
        }
    }
}

/// Lifecycle record of a single scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: JobId,
    pub state: ScanState,
    pub target_spec: String,
    pub port_spec: String,
    pub rate: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result: Option<Vec<HostRecord>>,
    pub failure_reason: Option<String>,
}

impl ScanJob {
    pub fn new(
        id: JobId,
        params: &ScanParameters,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            state: ScanState::Starting,
            target_spec: params.target_spec.clone(),
            port_spec: params.port_spec.clone(),
            rate: params.rate,
            started_at,
            ended_at: None,
            result: None,
            failure_reason: None,
        }
    }

    fn advance(&mut self, next: ScanState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<(), TransitionError> {
        self.advance(ScanState::Running)
    }

    pub fn complete(
        &mut self,
        hosts: Vec<HostRecord>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.advance(ScanState::Completed)?;
        self.ended_at = Some(at);
        self.result = Some(hosts);
        Ok(())
    }

    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.advance(ScanState::Failed)?;
        self.ended_at = Some(at);
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    /// Applies an execution outcome as the terminal transition.
    pub fn finish(
        &mut self,
        outcome: ExecutionOutcome,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        match outcome {
            ExecutionOutcome::Completed(hosts) => self.complete(hosts, at),
            ExecutionOutcome::Failed(reason) => self.fail(reason, at),
        }
    }

    pub fn summary(&self) -> ScanSummary {
        ScanSummary {
            id: self.id.clone(),
            state: self.state,
            target_spec: self.target_spec.clone(),
            started_at: self.started_at,
        }
    }
}

/// Row shown in recent-scan listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub id: JobId,
    pub state: ScanState,
    pub target_spec: String,
    pub started_at: DateTime<Utc>,
}
