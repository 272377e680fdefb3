//! Error types for batch analysis

use sheetwise_providers::ProviderError;
use thiserror::Error;

use crate::models::JobStatus;

/// Errors raised by the analysis subsystem
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Malformed job request; the job is never created
    #[error("Validation error: {0}")]
    Validation(String),

    /// A source or target column did not resolve against the schema
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Template synthesis failed: {0}")]
    TemplateSynthesis(String),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("Row source write failed: {0}")]
    RowSourceWrite(String),

    #[error("Row source error: {0}")]
    RowSource(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already exists: {0}")]
    JobExists(String),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// Any mutation of a completed, failed or cancelled record
    #[error("Job {0} is terminal and cannot be modified")]
    JobTerminal(String),

    #[error("Progress for job {job_id} would exceed total {total}")]
    ProgressOverflow { job_id: String, total: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job-level failure during background execution
    #[error("Orchestration error: {0}")]
    Orchestration(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// A completion failure attributed to one row
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Completion failed for row {row_id}: {source}")]
pub struct CompletionError {
    pub row_id: String,
    #[source]
    pub source: ProviderError,
}

impl CompletionError {
    pub fn new(row_id: impl Into<String>, source: ProviderError) -> Self {
        Self {
            row_id: row_id.into(),
            source,
        }
    }
}

/// Result type for analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

impl From<sheetwise_config::ConfigError> for AnalysisError {
    fn from(err: sheetwise_config::ConfigError) -> Self {
        AnalysisError::Configuration(err.to_string())
    }
}

impl From<crate::row_source::RowSourceError> for AnalysisError {
    fn from(err: crate::row_source::RowSourceError) -> Self {
        AnalysisError::RowSource(err.to_string())
    }
}
