//! Configuration manager implementation

use std::path::PathBuf;

use config::{Config, Environment, File};
use tracing::debug;

use crate::{
    error::{ConfigError, Result},
    types::{AppConfig, ConfigManager as ConfigManagerTrait},
};

/// Conventional Azure OpenAI variables, used for any Azure field left empty
const LEGACY_AZURE_ENDPOINT: &str = "AZURE_OPENAI_API_BASE";
const LEGACY_AZURE_API_KEY: &str = "AZURE_OPENAI_API_KEY";
const LEGACY_AZURE_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";
const LEGACY_AZURE_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT";

/// Configuration manager
pub struct ConfigManager {
    /// Configuration file path
    config_path: PathBuf,
    /// Environment prefix
    env_prefix: String,
    /// Read a `.env` file from the working directory before loading
    load_dotenv: bool,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
            env_prefix: "SHEETWISE".to_string(),
            load_dotenv: true,
        }
    }

    /// Create with custom config path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            config_path: path,
            ..Self::new()
        }
    }

    /// Use a different environment prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip `.env` loading
    pub fn without_dotenv(mut self) -> Self {
        self.load_dotenv = false;
        self
    }

    /// Get default config path
    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sheetwise")
            .join("config.toml")
    }

    /// Load and validate in one step
    pub fn load(&mut self) -> Result<AppConfig> {
        let config = self.load_config()?;
        self.validate_config(&config)?;
        Ok(config)
    }

    fn apply_legacy_azure_env(&self, config: &mut AppConfig) {
        let fill = |field: &mut String, var: &str| {
            if field.is_empty() {
                if let Ok(value) = std::env::var(var) {
                    *field = value;
                }
            }
        };
        fill(&mut config.azure.endpoint, LEGACY_AZURE_ENDPOINT);
        fill(&mut config.azure.api_key, LEGACY_AZURE_API_KEY);
        fill(&mut config.azure.deployment, LEGACY_AZURE_DEPLOYMENT);

        // api_version has a non-empty default, so the conventional variable only
        // applies when no prefixed override exists
        if std::env::var(format!("{}__AZURE__API_VERSION", self.env_prefix)).is_err() {
            if let Ok(version) = std::env::var(LEGACY_AZURE_API_VERSION) {
                config.azure.api_version = version;
            }
        }
    }
}

impl ConfigManagerTrait for ConfigManager {
    fn load_config(&mut self) -> Result<AppConfig> {
        if self.load_dotenv {
            if let Ok(path) = dotenv::dotenv() {
                debug!("Loaded environment from {:?}", path);
            }
        }

        let builder = Config::builder()
            .add_source(File::from(self.config_path.clone()).required(false))
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        let mut app_config: AppConfig = config.try_deserialize()?;
        self.apply_legacy_azure_env(&mut app_config);

        debug!("Configuration loaded from {:?}", self.config_path);
        Ok(app_config)
    }

    fn save_config(&self, config: &AppConfig) -> Result<()> {
        let toml = toml::to_string(config)?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_path, toml)?;
        Ok(())
    }

    fn validate_config(&self, config: &AppConfig) -> Result<()> {
        let jobs = &config.jobs;
        if jobs.batch_size == 0 {
            return Err(ConfigError::Validation(
                "Batch size must be greater than 0".to_string(),
            ));
        }
        if jobs.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "Max concurrency must be greater than 0".to_string(),
            ));
        }
        if jobs.max_cells_per_write == 0 {
            return Err(ConfigError::Validation(
                "Max cells per write must be greater than 0".to_string(),
            ));
        }
        if jobs.call_timeout_secs == 0 || config.azure.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Timeouts must be greater than 0".to_string(),
            ));
        }
        if jobs.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "Retry max attempts must be at least 1".to_string(),
            ));
        }
        if config.templates.max_input_tokens == 0 {
            return Err(ConfigError::Validation(
                "Max input tokens must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&config.azure.temperature) {
            return Err(ConfigError::Validation(format!(
                "Temperature must be between 0 and 2, got {}",
                config.azure.temperature
            )));
        }
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
