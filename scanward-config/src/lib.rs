//! Configuration loading for Scanward.
//!
//! Values are layered as built-in defaults, then `scanward.toml`, then
//! environment variables (optionally seeded from `.env`). Command-line
//! overrides are applied by the server binary on top of the result.

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader};
pub use models::{
    Config, ConfigMetadata, CorsConfig, DatabaseConfig, HstsSettings,
    SecurityConfig, ServerConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
