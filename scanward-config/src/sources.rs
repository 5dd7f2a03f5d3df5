use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub orchestrator: FileOrchestratorConfig,
    #[serde(default)]
    pub scanner: FileScannerConfig,
    #[serde(default)]
    pub retention: FileRetentionConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
    #[serde(default)]
    pub security: FileSecurityConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileOrchestratorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_capacity: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileScannerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leading_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Humantime duration such as `"2h"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRetentionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_on_startup: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSecurityConfig {
    #[serde(default)]
    pub hsts: FileHstsConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileHstsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_subdomains: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preload: Option<bool>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub database_max_connections: Option<u32>,
    pub workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub min_rate: Option<u32>,
    pub max_rate: Option<u32>,
    pub default_rate: Option<u32>,
    pub scanner_program: Option<String>,
    pub scanner_leading_args: Option<Vec<String>>,
    pub scanner_output_dir: Option<PathBuf>,
    pub scanner_timeout: Option<String>,
    pub retention_enabled: Option<bool>,
    pub retention_max_age: Option<String>,
    pub retention_interval: Option<String>,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the environment layer from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let csv = |name: &str| lookup(name).map(|raw| parse_csv(&raw));
        let flag = |name: &str| lookup(name).and_then(|raw| parse_bool(&raw));

        Self {
            config_path: lookup("SCANWARD_CONFIG").map(PathBuf::from),
            server_host: lookup("SERVER_HOST"),
            server_port: parsed(&lookup, "SERVER_PORT"),
            database_url: lookup("DATABASE_URL"),
            database_max_connections: parsed(&lookup, "DATABASE_MAX_CONNECTIONS"),
            workers: parsed(&lookup, "SCAN_WORKERS"),
            queue_capacity: parsed(&lookup, "SCAN_QUEUE_CAPACITY"),
            min_rate: parsed(&lookup, "SCAN_MIN_RATE"),
            max_rate: parsed(&lookup, "SCAN_MAX_RATE"),
            default_rate: parsed(&lookup, "SCAN_DEFAULT_RATE"),
            scanner_program: lookup("SCANNER_PROGRAM"),
            scanner_leading_args: csv("SCANNER_LEADING_ARGS"),
            scanner_output_dir: lookup("SCANNER_OUTPUT_DIR").map(PathBuf::from),
            scanner_timeout: lookup("SCANNER_TIMEOUT"),
            retention_enabled: flag("RETENTION_ENABLED"),
            retention_max_age: lookup("RETENTION_MAX_AGE"),
            retention_interval: lookup("RETENTION_INTERVAL"),
            cors_allowed_origins: csv("CORS_ALLOWED_ORIGINS"),
            hsts_max_age: parsed(&lookup, "HSTS_MAX_AGE"),
            hsts_include_subdomains: flag("HSTS_INCLUDE_SUBDOMAINS"),
        }
    }
}

fn parsed<F, T>(lookup: &F, name: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(name).and_then(|raw| raw.trim().parse().ok())
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
