//! Core configuration types and data structures

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Text completion service settings
    pub azure: AzureConfig,
    /// Job execution settings
    pub jobs: JobsConfig,
    /// Prompt template settings
    pub templates: TemplatesConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Azure OpenAI connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AzureConfig {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`
    pub endpoint: String,
    /// API key
    pub api_key: String,
    /// REST API version
    pub api_version: String,
    /// Deployment (model) name
    pub deployment: String,
    /// Sampling temperature
    pub temperature: f32,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
}

impl AzureConfig {
    /// Whether every field needed to reach the service is set
    pub fn is_configured(&self) -> bool {
        !self.endpoint.is_empty() && !self.api_key.is_empty() && !self.deployment.is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            api_version: "2024-02-01".to_string(),
            deployment: String::new(),
            temperature: 0.3,
            request_timeout_secs: 60,
        }
    }
}

/// Job execution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobsConfig {
    /// Directory holding one record per job (defaults to `~/.sheetwise/jobs`)
    pub jobs_dir: Option<PathBuf>,
    /// Rows per batch
    pub batch_size: usize,
    /// Maximum concurrently in-flight completion calls
    pub max_concurrency: usize,
    /// Maximum cells sent in one bulk update call
    pub max_cells_per_write: usize,
    /// Timeout for a single completion call in seconds
    pub call_timeout_secs: u64,
    /// Pause between batches in milliseconds
    pub batch_delay_ms: u64,
    /// Days a finished job record is kept before pruning
    pub retention_days: u32,
    /// Retry behaviour for transient completion errors
    pub retry: RetryConfig,
}

impl JobsConfig {
    /// Resolve the jobs directory, falling back to the home directory default
    pub fn resolved_jobs_dir(&self) -> crate::Result<PathBuf> {
        if let Some(dir) = &self.jobs_dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| {
            crate::ConfigError::Env("Could not determine home directory".to_string())
        })?;
        Ok(home.join(".sheetwise").join("jobs"))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            jobs_dir: None,
            batch_size: 10,
            max_concurrency: 3,
            max_cells_per_write: 100,
            call_timeout_secs: 60,
            batch_delay_ms: 0,
            retention_days: 7,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per completion call, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay_ms: u64,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Upper bound for a single delay
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

/// Prompt template settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TemplatesConfig {
    /// Input token budget per completion call
    pub max_input_tokens: usize,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: 6000,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
    /// Include target, thread, file and line in log lines
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            verbose: false,
        }
    }
}

/// Configuration manager trait
pub trait ConfigManager {
    /// Load configuration
    fn load_config(&mut self) -> Result<AppConfig, crate::error::ConfigError>;
    /// Save configuration
    fn save_config(&self, config: &AppConfig) -> Result<(), crate::error::ConfigError>;
    /// Validate configuration
    fn validate_config(&self, config: &AppConfig) -> Result<(), crate::error::ConfigError>;
}
