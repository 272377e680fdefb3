//! Sheetwise batch analysis
//!
//! Runs LLM-backed analyses (summaries, sentiment scores, insight extraction or
//! a custom goal) over rows of a tabular source and writes the results back into
//! a target column. Jobs are durable, run in the background with a bounded
//! worker pool, tolerate per-row failures and can be cancelled or recovered
//! after a restart.

pub mod analyzer;
pub mod chunker;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod retry_policy;
pub mod row_source;
pub mod store;
pub mod templates;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod tokenizer;

// Re-export commonly used types
pub use analyzer::RowAnalyzer;
pub use chunker::Chunker;
pub use error::{AnalysisError, AnalysisResult, CompletionError};
pub use logging::init_logging;
pub use models::{
    AnalysisKind, Job, JobPatch, JobRequest, JobStatus, JobTimestamps, Progress,
};
pub use orchestrator::{JobOrchestrator, OrchestratorConfig, RecoveryReport};
pub use retry_policy::RetryPolicy;
pub use row_source::{Cell, CellUpdate, Column, Row, RowSource, RowSourceError, RowWriteOutcome};
pub use store::JobStore;
pub use templates::{Template, TemplateRegistry, CONTENT_PLACEHOLDER, PREVIOUS_RESULT_PLACEHOLDER};
pub use tokenizer::{Cl100kTokenizer, TokenCounter};
