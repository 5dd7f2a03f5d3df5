use thiserror::Error;

use crate::job::{JobId, TransitionError};
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Scan {0} not found")]
    NotFound(String),

    #[error("Scan job {0} already exists")]
    DuplicateJob(JobId),

    #[error("Scan queue is full")]
    QueueFull,

    #[error("Scan dispatcher is shut down")]
    Shutdown,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        OrchestratorError::Persistence(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for OrchestratorError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        OrchestratorError::Persistence(format!("migration failed: {err}"))
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Internal(format!("serialization failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
