//! # Scanward Server
//!
//! HTTP front end for the scan orchestrator.
//!
//! - `POST /start_scan` admits a scan and returns its id
//! - `GET /scan_status/{id}` returns the full job record
//! - `GET /recent_scans` lists the newest jobs
//! - `GET /scan_events` streams `scan_update` events over SSE
//! - `GET /health` reports worker pool gauges

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use infra::errors::{AppError, AppResult};
pub use routes::create_app;
