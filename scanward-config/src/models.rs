use std::path::PathBuf;

use scanward_core::{OrchestratorConfig, RetentionPolicy, ScannerSettings};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 12000;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://scans.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_HSTS_MAX_AGE: u64 = 31_536_000;

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
    pub scanner: ScannerSettings,
    pub retention: RetentionPolicy,
    pub cors: CorsConfig,
    pub security: SecurityConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.scanner.output_dir)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn is_wildcard_included(&self) -> bool {
        self.allowed_origins
            .iter()
            .any(|origin| origin.trim() == "*")
    }
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub hsts: HstsSettings,
}

#[derive(Debug, Clone)]
pub struct HstsSettings {
    pub max_age: u64,
    pub include_subdomains: bool,
    pub preload: bool,
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
