use once_cell::sync::Lazy;
use std::{fs, path::PathBuf, time::Duration};
use thiserror::Error;

use scanward_core::{
    OrchestratorConfig, RateBounds, RetentionPolicy, ScannerSettings,
    config::{
        DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_RATE, DEFAULT_MIN_RATE,
        DEFAULT_QUEUE_CAPACITY, DEFAULT_RATE, DEFAULT_RECENT_LIMIT,
        DEFAULT_RETENTION_INTERVAL, DEFAULT_RETENTION_MAX_AGE, DEFAULT_WORKERS,
    },
};

use super::{
    models::{
        Config, ConfigMetadata, CorsConfig, DEFAULT_DATABASE_URL,
        DEFAULT_HOST, DEFAULT_HSTS_MAX_AGE, DEFAULT_MAX_CONNECTIONS,
        DEFAULT_PORT, DatabaseConfig, HstsSettings, SecurityConfig,
        ServerConfig,
    },
    sources::{EnvConfig, FileConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("scanward.toml"),
        PathBuf::from("config/scanward.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
struct ConfigLoaderOptions {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

/// Resolved configuration plus any non-fatal findings.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads the `.env` file, then layers defaults, the TOML file and the
    /// process environment.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Same as [`ConfigLoader::load`] with an explicit environment layer and
    /// no `.env` handling.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) =
            self.compose_config(file_config, env, config_path)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, explicit) =
            match (&self.options.config_path, &env.config_path) {
                (Some(path), _) | (None, Some(path)) => (Some(path.clone()), true),
                (None, None) => (
                    DEFAULT_CONFIG_LOCATIONS
                        .iter()
                        .find(|candidate| candidate.exists())
                        .cloned(),
                    false,
                ),
            };

        let Some(path) = path else {
            return Ok((None, None));
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents =
            fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
                path: path.clone(),
                source,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| {
                ConfigLoadError::Parse {
                    path: path.clone(),
                    source,
                }
            })?;

        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if file_config.is_none() {
            warnings.push_with_hint(
                "No scanward.toml detected; using defaults and environment variables",
                "Create scanward.toml or set SCANWARD_CONFIG to pin the configuration",
            );
        }

        let FileConfig {
            server: file_server,
            database: file_database,
            orchestrator: file_orchestrator,
            scanner: file_scanner,
            retention: file_retention,
            cors: file_cors,
            security: file_security,
        } = file_config.unwrap_or_default();

        let server = ServerConfig {
            host: env
                .server_host
                .or(file_server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: env.server_port.or(file_server.port).unwrap_or(DEFAULT_PORT),
        };

        let database = DatabaseConfig {
            url: env
                .database_url
                .filter(|value| !value.trim().is_empty())
                .or(file_database.url)
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_connections: env
                .database_max_connections
                .or(file_database.max_connections)
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
        };

        let orchestrator = OrchestratorConfig {
            workers: env
                .workers
                .or(file_orchestrator.workers)
                .unwrap_or(DEFAULT_WORKERS),
            queue_capacity: env
                .queue_capacity
                .or(file_orchestrator.queue_capacity)
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
            rates: RateBounds {
                min: env
                    .min_rate
                    .or(file_orchestrator.min_rate)
                    .unwrap_or(DEFAULT_MIN_RATE),
                max: env
                    .max_rate
                    .or(file_orchestrator.max_rate)
                    .unwrap_or(DEFAULT_MAX_RATE),
                default: env
                    .default_rate
                    .or(file_orchestrator.default_rate)
                    .unwrap_or(DEFAULT_RATE),
            },
            recent_limit: file_orchestrator
                .recent_limit
                .unwrap_or(DEFAULT_RECENT_LIMIT),
            event_capacity: file_orchestrator
                .event_capacity
                .unwrap_or(DEFAULT_EVENT_CAPACITY),
        };

        let scanner_defaults = ScannerSettings::default();
        let scanner = ScannerSettings {
            program: env
                .scanner_program
                .or(file_scanner.program)
                .unwrap_or(scanner_defaults.program),
            leading_args: env
                .scanner_leading_args
                .or(file_scanner.leading_args)
                .unwrap_or(scanner_defaults.leading_args),
            output_dir: env
                .scanner_output_dir
                .or(file_scanner.output_dir)
                .unwrap_or(scanner_defaults.output_dir),
            timeout: parse_duration(
                "scanner.timeout",
                env.scanner_timeout.or(file_scanner.timeout),
            )?,
        };

        let retention = RetentionPolicy {
            enabled: env
                .retention_enabled
                .or(file_retention.enabled)
                .unwrap_or(true),
            max_age: parse_duration(
                "retention.max_age",
                env.retention_max_age.or(file_retention.max_age),
            )?
            .unwrap_or(DEFAULT_RETENTION_MAX_AGE),
            interval: parse_duration(
                "retention.interval",
                env.retention_interval.or(file_retention.interval),
            )?
            .unwrap_or(DEFAULT_RETENTION_INTERVAL),
            run_on_startup: file_retention.run_on_startup.unwrap_or(true),
        };

        let cors = CorsConfig {
            allowed_origins: env
                .cors_allowed_origins
                .or(file_cors.allowed_origins)
                .unwrap_or_else(|| vec!["*".to_string()]),
        };

        let security = SecurityConfig {
            hsts: HstsSettings {
                max_age: env
                    .hsts_max_age
                    .or(file_security.hsts.max_age)
                    .unwrap_or(DEFAULT_HSTS_MAX_AGE),
                include_subdomains: env
                    .hsts_include_subdomains
                    .or(file_security.hsts.include_subdomains)
                    .unwrap_or(true),
                preload: file_security.hsts.preload.unwrap_or(false),
            },
        };

        let config = Config {
            server,
            database,
            orchestrator,
            scanner,
            retention,
            cors,
            security,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded: false,
            },
        };

        config
            .ensure_directories()
            .map_err(|source| ConfigLoadError::Filesystem {
                path: config.scanner.output_dir.clone(),
                source,
            })?;

        let guard_warnings = validation::apply_guard_rails(&config)?;
        warnings.extend(guard_warnings);

        Ok((config, warnings))
    }
}

fn parse_duration(
    field: &'static str,
    raw: Option<String>,
) -> Result<Option<Duration>, ConfigLoadError> {
    raw.filter(|value| !value.trim().is_empty())
        .map(|value| {
            humantime::parse_duration(value.trim()).map_err(|source| {
                ConfigLoadError::InvalidDuration {
                    field,
                    value,
                    source,
                }
            })
        })
        .transpose()
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration '{value}' for {field}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("failed to create scanner output directory {path}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
