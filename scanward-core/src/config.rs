//! Runtime settings consumed by the orchestrator. Loading and layering
//! happens in `scanward-config`; these are the resolved values.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
pub const DEFAULT_MIN_RATE: u32 = 100;
pub const DEFAULT_MAX_RATE: u32 = 100_000;
pub const DEFAULT_RATE: u32 = 1000;
pub const DEFAULT_RETENTION_MAX_AGE: Duration =
    Duration::from_secs(30 * 24 * 60 * 60);
pub const DEFAULT_RETENTION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Inclusive packets-per-second bounds accepted at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBounds {
    pub min: u32,
    pub max: u32,
    /// Applied when a request omits the rate.
    pub default: u32,
}

impl Default for RateBounds {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_RATE,
            max: DEFAULT_MAX_RATE,
            default: DEFAULT_RATE,
        }
    }
}

impl RateBounds {
    pub fn contains(&self, rate: i64) -> bool {
        rate >= i64::from(self.min) && rate <= i64::from(self.max)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of scans executing at once.
    pub workers: usize,
    /// Admitted jobs allowed to wait for a worker before submissions are
    /// refused.
    pub queue_capacity: usize,
    pub rates: RateBounds,
    pub recent_limit: usize,
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            rates: RateBounds::default(),
            recent_limit: DEFAULT_RECENT_LIMIT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// How the external scanner is launched.
#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub program: String,
    /// Arguments placed before the scan arguments, e.g. `program = "sudo"`
    /// with `leading_args = ["masscan"]`.
    pub leading_args: Vec<String>,
    pub output_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            program: "masscan".to_string(),
            leading_args: Vec::new(),
            output_dir: std::env::temp_dir(),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub enabled: bool,
    pub max_age: Duration,
    pub interval: Duration,
    pub run_on_startup: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age: DEFAULT_RETENTION_MAX_AGE,
            interval: DEFAULT_RETENTION_INTERVAL,
            run_on_startup: true,
        }
    }
}
