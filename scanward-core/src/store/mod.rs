//! Durable record of every scan job.

mod sqlite;

pub use sqlite::SqliteJobStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{OrchestratorError, Result};
use crate::job::{self, JobId, ScanJob};

/// Repository abstraction for scan job records.
///
/// Implementations must make every successful write visible to subsequent
/// reads, and must never let `insert` overwrite an existing record.
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug {
    /// Creates a new record, failing with
    /// [`OrchestratorError::DuplicateJob`](crate::error::OrchestratorError::DuplicateJob)
    /// when the id is taken.
    async fn insert(&self, job: &ScanJob) -> Result<()>;

    /// Upserts the full record keyed by id.
    async fn save(&self, job: &ScanJob) -> Result<()>;

    async fn get(&self, id: &JobId) -> Result<Option<ScanJob>>;

    /// Most recently started jobs first, at most `limit`.
    async fn recent(&self, limit: usize) -> Result<Vec<ScanJob>>;

    /// Deletes every job started strictly before `cutoff`, returning the
    /// number of removed records.
    async fn delete_started_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Jobs still in `starting` or `running`, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<ScanJob>>;
}

/// Start time before which jobs are older than `max_age`.
pub fn retention_cutoff(max_age: Duration) -> Result<DateTime<Utc>> {
    let max_age = chrono::Duration::from_std(max_age).map_err(|err| {
        OrchestratorError::Internal(format!("retention age too large: {err}"))
    })?;
    job::now().checked_sub_signed(max_age).ok_or_else(|| {
        OrchestratorError::Internal("retention age too large".to_string())
    })
}
