use std::{fmt, str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Row,
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool,
        SqlitePoolOptions, SqliteRow,
    },
};
use tracing::{debug, info};

use super::JobStore;
use crate::error::{OrchestratorError, Result};
use crate::job::{JobId, ScanJob, ScanState};
use crate::result::HostRecord;

const JOB_COLUMNS: &str = "id, state, target_spec, port_spec, rate, \
     started_at, ended_at, result, failure_reason";

/// SQLite-backed [`JobStore`]. Timestamps are persisted as microseconds
/// since the unix epoch so ordering and retention cutoffs compare
/// numerically.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl fmt::Debug for SqliteJobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteJobStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl SqliteJobStore {
    /// Opens (creating if needed) the database at `url` and applies pending
    /// migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        info!(url, "scan job store ready");
        Ok(store)
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn map_row(row: &SqliteRow) -> Result<ScanJob> {
        let id: String = row.try_get("id").map_err(|e| {
            OrchestratorError::Internal(format!("Failed to read job id: {e}"))
        })?;
        let state: String = row.try_get("state").map_err(|e| {
            OrchestratorError::Internal(format!("Failed to read state: {e}"))
        })?;
        let state = ScanState::from_str(&state)
            .map_err(OrchestratorError::Internal)?;
        let target_spec: String = row.try_get("target_spec").map_err(|e| {
            OrchestratorError::Internal(format!(
                "Failed to read target_spec: {e}"
            ))
        })?;
        let port_spec: String = row.try_get("port_spec").map_err(|e| {
            OrchestratorError::Internal(format!(
                "Failed to read port_spec: {e}"
            ))
        })?;
        let rate: i64 = row.try_get("rate").map_err(|e| {
            OrchestratorError::Internal(format!("Failed to read rate: {e}"))
        })?;
        let rate = u32::try_from(rate).map_err(|_| {
            OrchestratorError::Internal(format!("Stored rate {rate} is invalid"))
        })?;
        let started_at: i64 = row.try_get("started_at").map_err(|e| {
            OrchestratorError::Internal(format!(
                "Failed to read started_at: {e}"
            ))
        })?;
        let ended_at: Option<i64> = row.try_get("ended_at").map_err(|e| {
            OrchestratorError::Internal(format!("Failed to read ended_at: {e}"))
        })?;
        let result: Option<String> = row.try_get("result").map_err(|e| {
            OrchestratorError::Internal(format!("Failed to read result: {e}"))
        })?;
        let failure_reason: Option<String> =
            row.try_get("failure_reason").map_err(|e| {
                OrchestratorError::Internal(format!(
                    "Failed to read failure_reason: {e}"
                ))
            })?;

        let result = result
            .map(|raw| serde_json::from_str::<Vec<HostRecord>>(&raw))
            .transpose()?;

        Ok(ScanJob {
            id: JobId::from(id),
            state,
            target_spec,
            port_spec,
            rate,
            started_at: from_micros(started_at)?,
            ended_at: ended_at.map(from_micros).transpose()?,
            result,
            failure_reason,
        })
    }

    fn encode_result(job: &ScanJob) -> Result<Option<String>> {
        Ok(job
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?)
    }
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| {
        OrchestratorError::Internal(format!(
            "Stored timestamp {micros} is out of range"
        ))
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &ScanJob) -> Result<()> {
        let result = Self::encode_result(job)?;
        let query = format!(
            "INSERT INTO scan_jobs ({JOB_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO NOTHING"
        );

        let outcome = sqlx::query(&query)
            .bind(job.id.as_str())
            .bind(job.state.as_str())
            .bind(&job.target_spec)
            .bind(&job.port_spec)
            .bind(i64::from(job.rate))
            .bind(to_micros(job.started_at))
            .bind(job.ended_at.map(to_micros))
            .bind(result)
            .bind(job.failure_reason.as_deref())
            .execute(&self.pool)
            .await?;

        if outcome.rows_affected() == 0 {
            return Err(OrchestratorError::DuplicateJob(job.id.clone()));
        }

        debug!(job_id = %job.id, state = %job.state, "scan job inserted");
        Ok(())
    }

    async fn save(&self, job: &ScanJob) -> Result<()> {
        let result = Self::encode_result(job)?;
        let query = format!(
            "INSERT INTO scan_jobs ({JOB_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 state = excluded.state, \
                 target_spec = excluded.target_spec, \
                 port_spec = excluded.port_spec, \
                 rate = excluded.rate, \
                 started_at = excluded.started_at, \
                 ended_at = excluded.ended_at, \
                 result = excluded.result, \
                 failure_reason = excluded.failure_reason"
        );

        sqlx::query(&query)
            .bind(job.id.as_str())
            .bind(job.state.as_str())
            .bind(&job.target_spec)
            .bind(&job.port_spec)
            .bind(i64::from(job.rate))
            .bind(to_micros(job.started_at))
            .bind(job.ended_at.map(to_micros))
            .bind(result)
            .bind(job.failure_reason.as_deref())
            .execute(&self.pool)
            .await?;

        debug!(job_id = %job.id, state = %job.state, "scan job saved");
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<ScanJob>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ScanJob>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM scan_jobs \
             ORDER BY started_at DESC, id DESC LIMIT ?"
        );
        let rows = sqlx::query(&query)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn delete_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let outcome =
            sqlx::query("DELETE FROM scan_jobs WHERE started_at < ?")
                .bind(to_micros(cutoff))
                .execute(&self.pool)
                .await?;

        Ok(outcome.rows_affected())
    }

    async fn list_unfinished(&self) -> Result<Vec<ScanJob>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM scan_jobs \
             WHERE state IN ('starting', 'running') \
             ORDER BY started_at ASC, id ASC"
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter().map(Self::map_row).collect()
    }
}
