//! Sheetwise configuration
//!
//! Loads the orchestrator settings from built-in defaults, an optional TOML file
//! and `SHEETWISE__*` environment variables, then validates them.

pub mod error;
pub mod manager;
pub mod types;

pub use error::{ConfigError, Result};
pub use manager::ConfigManager;
pub use types::{
    AppConfig, AzureConfig, ConfigManager as ConfigManagerTrait, JobsConfig, LoggingConfig,
    RetryConfig, TemplatesConfig,
};
