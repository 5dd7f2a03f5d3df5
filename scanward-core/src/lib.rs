//! # Scanward Core
//!
//! Orchestration of long-running network scans: admission, durable job
//! records, execution of an external scanner per job, and live state
//! events.
//!
//! ## Overview
//!
//! - [`validation`]: pure admission checks for targets, ports and rate
//! - [`store`]: the [`JobStore`] trait and its SQLite implementation
//! - [`runner`]: the [`ScanRunner`] seam and the masscan process runner
//! - [`executor`]: drives one job through `running` to a terminal state
//! - [`dispatcher`]: bounded queue feeding a fixed-size worker pool
//! - [`events`]: broadcast of state changes to observers
//! - [`orchestrator`]: the facade used by the HTTP layer
//!
//! ## Lifecycle
//!
//! ```text
//! starting -> running -> completed
//!                     \-> failed
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod executor;
pub mod job;
pub mod orchestrator;
pub mod result;
pub mod runner;
pub mod store;
pub mod validation;

pub use config::{
    OrchestratorConfig, RateBounds, RetentionPolicy, ScannerSettings,
};
pub use dispatcher::{DispatcherStats, JobDispatcher};
pub use error::{OrchestratorError, Result};
pub use events::{EventNotifier, ScanEvent};
pub use executor::JobExecutor;
pub use job::{
    ExecutionOutcome, JobId, ScanJob, ScanState, ScanSummary, TransitionError,
};
pub use orchestrator::{
    OrchestratorStats, RecoveryReport, ScanOrchestrator,
    spawn_retention_worker,
};
pub use result::{HostRecord, PortRecord, parse_scan_output};
pub use runner::{
    MasscanRunner, ProcessOutput, RunnerError, ScanInvocation, ScanRunner,
};
pub use store::{JobStore, SqliteJobStore, retention_cutoff};
pub use validation::{ScanParameters, ScanRequest, ValidationError, validate};
