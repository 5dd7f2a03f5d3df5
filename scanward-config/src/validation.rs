use std::path::Path;

use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error("orchestrator.workers must be at least 1")]
    NoWorkers,
    #[error("orchestrator.queue_capacity must be at least 1")]
    NoQueueCapacity,
    #[error("orchestrator.recent_limit must be at least 1")]
    NoRecentLimit,
    #[error("orchestrator.event_capacity must be at least 1")]
    NoEventCapacity,
    #[error("rate bounds are inverted: min_rate {min} exceeds max_rate {max}")]
    InvertedRateBounds { min: u32, max: u32 },
    #[error("default_rate {default} lies outside {min}..={max}")]
    DefaultRateOutOfBounds { default: u32, min: u32, max: u32 },
    #[error("retention.interval must be greater than zero")]
    ZeroRetentionInterval,
    #[error("database.max_connections must be at least 1")]
    NoDatabaseConnections,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let orchestrator = &config.orchestrator;

    if orchestrator.workers == 0 {
        return Err(ConfigGuardRailError::NoWorkers);
    }
    if orchestrator.queue_capacity == 0 {
        return Err(ConfigGuardRailError::NoQueueCapacity);
    }
    if orchestrator.recent_limit == 0 {
        return Err(ConfigGuardRailError::NoRecentLimit);
    }
    if orchestrator.event_capacity == 0 {
        return Err(ConfigGuardRailError::NoEventCapacity);
    }
    if config.database.max_connections == 0 {
        return Err(ConfigGuardRailError::NoDatabaseConnections);
    }

    let rates = orchestrator.rates;
    if rates.min > rates.max {
        return Err(ConfigGuardRailError::InvertedRateBounds {
            min: rates.min,
            max: rates.max,
        });
    }
    if !rates.contains(i64::from(rates.default)) {
        return Err(ConfigGuardRailError::DefaultRateOutOfBounds {
            default: rates.default,
            min: rates.min,
            max: rates.max,
        });
    }

    if config.retention.enabled && config.retention.interval.is_zero() {
        return Err(ConfigGuardRailError::ZeroRetentionInterval);
    }

    if config.cors.is_wildcard_included() {
        warnings.push_with_hint(
            "CORS allows any origin",
            "Set CORS_ALLOWED_ORIGINS to the dashboards that should reach the API",
        );
    }

    if !program_resolvable(&config.scanner.program) {
        warnings.push_with_hint(
            format!("scanner program '{}' was not found on PATH", config.scanner.program),
            "Install masscan or point SCANNER_PROGRAM at it; every scan will fail until then",
        );
    }

    if !config.retention.enabled {
        warnings.push("retention cleanup disabled; scan history grows unbounded");
    }

    Ok(warnings)
}

/// Absolute or relative paths are checked directly, bare names against PATH.
fn program_resolvable(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }

    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
        })
        .unwrap_or(false)
}
