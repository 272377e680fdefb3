//! Job data model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};

/// Kind of analysis applied to each row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Summarize,
    Sentiment,
    Interpret,
    Custom,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Summarize => "summarize",
            AnalysisKind::Sentiment => "sentiment",
            AnalysisKind::Interpret => "interpret",
            AnalysisKind::Custom => "custom",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "summarize" => Ok(AnalysisKind::Summarize),
            "sentiment" => Ok(AnalysisKind::Sentiment),
            "interpret" => Ok(AnalysisKind::Interpret),
            "custom" => Ok(AnalysisKind::Custom),
            other => Err(AnalysisError::Validation(format!(
                "Unknown analysis kind: {}",
                other
            ))),
        }
    }
}

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Edges of `queued -> running -> {completed, failed, cancelled}` plus
    /// `queued -> cancelled`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row counters; `processed + failed <= total`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            failed: 0,
        }
    }

    pub fn resolved(&self) -> usize {
        self.processed + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTimestamps {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<DateTime<Utc>>,
}

impl JobTimestamps {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            created: now,
            updated: now,
            completed: None,
            failed: None,
            cancelled: None,
        }
    }
}

/// Durable record of one batch analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub sheet_id: String,
    pub analysis_kind: AnalysisKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_goal: Option<String>,
    pub source_columns: Vec<String>,
    pub target_column: String,
    pub row_ids: Vec<String>,
    pub status: JobStatus,
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamps: JobTimestamps,
}

impl Job {
    /// Create a queued job with a fresh id over resolved columns and rows
    pub fn new(
        sheet_id: impl Into<String>,
        analysis_kind: AnalysisKind,
        custom_goal: Option<String>,
        source_columns: Vec<String>,
        target_column: impl Into<String>,
        row_ids: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sheet_id: sheet_id.into(),
            analysis_kind,
            custom_goal,
            source_columns,
            target_column: target_column.into(),
            progress: Progress::new(row_ids.len()),
            row_ids,
            status: JobStatus::Queued,
            error: None,
            timestamps: JobTimestamps::new(now),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Timestamp of the terminal transition, if any
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            JobStatus::Completed => self.timestamps.completed,
            JobStatus::Failed => self.timestamps.failed,
            JobStatus::Cancelled => self.timestamps.cancelled,
            _ => None,
        }
    }

    /// Merge a patch into this record
    ///
    /// Nothing is modified when an error is returned.
    pub fn apply(&mut self, patch: &JobPatch, now: DateTime<Utc>) -> AnalysisResult<()> {
        if let Some(next) = patch.status {
            if !self.status.can_transition_to(next) {
                return Err(AnalysisError::InvalidTransition {
                    job_id: self.id.clone(),
                    from: self.status,
                    to: next,
                });
            }
        } else if self.is_terminal() {
            return Err(AnalysisError::JobTerminal(self.id.clone()));
        }

        let next_status = patch.status.unwrap_or(self.status);
        if patch.error.is_some() && next_status != JobStatus::Failed {
            return Err(AnalysisError::Validation(format!(
                "Error may only be recorded on a failed job, not {}",
                next_status
            )));
        }

        let processed = self.progress.processed + patch.add_processed;
        let failed = self.progress.failed + patch.add_failed;
        if processed + failed > self.progress.total {
            return Err(AnalysisError::ProgressOverflow {
                job_id: self.id.clone(),
                total: self.progress.total,
            });
        }

        self.progress.processed = processed;
        self.progress.failed = failed;
        if let Some(error) = &patch.error {
            self.error = Some(error.clone());
        }
        if let Some(next) = patch.status {
            self.status = next;
            match next {
                JobStatus::Completed => self.timestamps.completed = Some(now),
                JobStatus::Failed => self.timestamps.failed = Some(now),
                JobStatus::Cancelled => self.timestamps.cancelled = Some(now),
                JobStatus::Queued | JobStatus::Running => {}
            }
        }
        self.timestamps.updated = now;
        Ok(())
    }
}

/// Partial update applied by the job store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub add_processed: usize,
    pub add_failed: usize,
    pub error: Option<String>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn progress(processed: usize, failed: usize) -> Self {
        Self {
            add_processed: processed,
            add_failed: failed,
            ..Default::default()
        }
    }
}

/// Caller request for a new job
///
/// Columns may be given by id or by title; `row_ids` of `None` or an empty
/// list selects every row currently in the sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub sheet_id: String,
    pub analysis_kind: AnalysisKind,
    pub source_columns: Vec<String>,
    pub target_column: String,
    #[serde(default)]
    pub row_ids: Option<Vec<String>>,
    #[serde(default)]
    pub custom_goal: Option<String>,
}

impl JobRequest {
    pub fn new(
        sheet_id: impl Into<String>,
        analysis_kind: AnalysisKind,
        source_columns: Vec<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            analysis_kind,
            source_columns,
            target_column: target_column.into(),
            row_ids: None,
            custom_goal: None,
        }
    }

    pub fn with_rows(mut self, row_ids: Vec<String>) -> Self {
        self.row_ids = Some(row_ids);
        self
    }

    pub fn with_custom_goal(mut self, goal: impl Into<String>) -> Self {
        self.custom_goal = Some(goal.into());
        self
    }

    /// Check the request shape before touching the row source
    pub fn validate(&self) -> AnalysisResult<()> {
        if self.sheet_id.trim().is_empty() {
            return Err(AnalysisError::Validation(
                "Sheet id is required".to_string(),
            ));
        }
        if self.source_columns.is_empty() {
            return Err(AnalysisError::Validation(
                "At least one source column is required".to_string(),
            ));
        }
        if self.source_columns.iter().any(|c| c.trim().is_empty()) {
            return Err(AnalysisError::Validation(
                "Source column names must not be empty".to_string(),
            ));
        }
        if self.target_column.trim().is_empty() {
            return Err(AnalysisError::Validation(
                "Target column is required".to_string(),
            ));
        }

        let has_goal = self
            .custom_goal
            .as_deref()
            .map(|g| !g.trim().is_empty())
            .unwrap_or(false);
        match (self.analysis_kind, has_goal) {
            (AnalysisKind::Custom, false) => Err(AnalysisError::Validation(
                "Custom analysis requires a goal".to_string(),
            )),
            (kind, true) if kind != AnalysisKind::Custom => Err(AnalysisError::Validation(
                format!("A custom goal is only accepted for custom analysis, not {}", kind),
            )),
            _ => Ok(()),
        }
    }
}
