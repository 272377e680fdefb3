//! Job orchestration
//!
//! `start` validates a request, resolves columns and rows, persists a queued
//! job and hands it to a supervised background task. The task walks the rows
//! in fixed-size batches. Rows of a batch are analyzed concurrently on a
//! worker pool shared by every job of this orchestrator; once all rows of a
//! batch have resolved the successes are written back in bulk and progress
//! advances by one batch. Cancellation is observed between batches.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sheetwise_config::{AppConfig, JobsConfig};
use sheetwise_providers::{AzureOpenAiCompletion, CompletionService, ProviderError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analyzer::RowAnalyzer;
use crate::error::{AnalysisError, AnalysisResult, CompletionError};
use crate::models::{Job, JobPatch, JobRequest, JobStatus};
use crate::retry_policy::RetryPolicy;
use crate::row_source::{resolve_column, CellUpdate, Row, RowSource};
use crate::store::JobStore;
use crate::templates::{Template, TemplateRegistry};
use crate::tokenizer::Cl100kTokenizer;

const INTERRUPTED_MESSAGE: &str = "Job interrupted by restart";

/// Batching and concurrency settings
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub batch_size: usize,
    /// In-flight completion calls across all jobs
    pub max_concurrency: usize,
    pub max_cells_per_write: usize,
    pub batch_delay: Duration,
    /// Age after which finished jobs are pruned by recovery
    pub retention: chrono::Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

impl From<&JobsConfig> for OrchestratorConfig {
    fn from(config: &JobsConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_concurrency: config.max_concurrency,
            max_cells_per_write: config.max_cells_per_write,
            batch_delay: config.batch_delay(),
            retention: chrono::Duration::days(i64::from(config.retention_days)),
        }
    }
}

/// Jobs touched by restart recovery
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    /// Previously running jobs, now failed
    pub failed: Vec<String>,
    /// Jobs that never started, now cancelled
    pub cancelled: Vec<String>,
    pub pruned: usize,
}

#[derive(Debug, Default)]
struct BatchOutcome {
    processed: usize,
    failed: usize,
}

struct Inner {
    store: JobStore,
    rows: Arc<dyn RowSource>,
    analyzer: Arc<RowAnalyzer>,
    templates: TemplateRegistry,
    config: OrchestratorConfig,
    workers: Arc<Semaphore>,
    /// Cancellation handles of executions alive in this process
    handles: RwLock<HashMap<String, CancellationToken>>,
}

/// Owns the lifecycle of batch analysis jobs
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

/// A rejected patch on a record that went terminal underneath us
fn is_discarded(err: &AnalysisError) -> bool {
    matches!(
        err,
        AnalysisError::InvalidTransition { .. } | AnalysisError::JobTerminal(_)
    )
}

impl JobOrchestrator {
    pub fn new(
        store: JobStore,
        rows: Arc<dyn RowSource>,
        analyzer: RowAnalyzer,
        templates: TemplateRegistry,
        mut config: OrchestratorConfig,
    ) -> Self {
        config.batch_size = config.batch_size.max(1);
        config.max_concurrency = config.max_concurrency.max(1);
        config.max_cells_per_write = config.max_cells_per_write.max(1);

        Self {
            inner: Arc::new(Inner {
                store,
                rows,
                analyzer: Arc::new(analyzer),
                templates,
                workers: Arc::new(Semaphore::new(config.max_concurrency)),
                config,
                handles: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Wire the Azure OpenAI service, the `cl100k_base` tokenizer and the file
    /// store from configuration
    pub async fn from_config(config: &AppConfig, rows: Arc<dyn RowSource>) -> AnalysisResult<Self> {
        let completion = AzureOpenAiCompletion::from_config(&config.azure)
            .map_err(|e| AnalysisError::Configuration(e.to_string()))?;
        Self::from_config_with_completion(config, rows, Arc::new(completion)).await
    }

    /// Like [`JobOrchestrator::from_config`] with a caller-supplied completion service
    pub async fn from_config_with_completion(
        config: &AppConfig,
        rows: Arc<dyn RowSource>,
        completion: Arc<dyn CompletionService>,
    ) -> AnalysisResult<Self> {
        let analyzer = RowAnalyzer::new(
            completion,
            Arc::new(Cl100kTokenizer::new()?),
            config.jobs.call_timeout(),
        )
        .with_temperature(config.azure.temperature)
        .with_retry_policy(RetryPolicy::from(&config.jobs.retry));

        let store = JobStore::open(config.jobs.resolved_jobs_dir()?).await?;

        Ok(Self::new(
            store,
            rows,
            analyzer,
            TemplateRegistry::new(config.templates.max_input_tokens),
            OrchestratorConfig::from(&config.jobs),
        ))
    }

    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Create a job and start it in the background; returns the job id
    ///
    /// Only request validation and column resolution errors are returned here.
    /// Everything that happens afterwards is recorded on the job.
    pub async fn start(&self, request: JobRequest) -> AnalysisResult<String> {
        request.validate()?;

        let columns = self.inner.rows.fetch_schema(&request.sheet_id).await?;
        let resolve = |name: &str| {
            resolve_column(&columns, name)
                .map(|c| c.id.clone())
                .ok_or_else(|| AnalysisError::UnknownColumn(name.to_string()))
        };
        let source_columns = request
            .source_columns
            .iter()
            .map(|name| resolve(name.as_str()))
            .collect::<AnalysisResult<Vec<_>>>()?;
        let target_column = resolve(request.target_column.as_str())?;

        let requested = match request.row_ids {
            Some(ids) if !ids.is_empty() => ids,
            _ => self
                .inner
                .rows
                .fetch_rows(&request.sheet_id)
                .await?
                .into_iter()
                .map(|row| row.id)
                .collect(),
        };
        let mut seen = HashSet::new();
        let row_ids: Vec<String> = requested
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let job = Job::new(
            request.sheet_id,
            request.analysis_kind,
            request.custom_goal,
            source_columns,
            target_column,
            row_ids,
        );
        self.inner.store.create(&job).await?;

        let token = CancellationToken::new();
        self.inner
            .handles
            .write()
            .insert(job.id.clone(), token.clone());

        info!(
            job_id = %job.id,
            sheet_id = %job.sheet_id,
            kind = %job.analysis_kind,
            total = job.progress.total,
            "Job queued"
        );

        let supervisor = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move { supervisor.supervise(job_id, token).await });

        Ok(job.id)
    }

    pub async fn status(&self, job_id: &str) -> AnalysisResult<Job> {
        self.inner.store.get(job_id).await
    }

    /// Cancel a queued or running job
    ///
    /// Calls already in flight finish; no new batch starts and the current
    /// batch's results are discarded.
    pub async fn cancel(&self, job_id: &str) -> AnalysisResult<Job> {
        let job = self
            .inner
            .store
            .update(job_id, JobPatch::status(JobStatus::Cancelled))
            .await?;

        if let Some(token) = self.inner.handles.read().get(job_id) {
            token.cancel();
        }

        info!(job_id = %job_id, "Job cancelled");
        Ok(job)
    }

    /// Whether an execution for this job is alive in this process
    pub fn is_active(&self, job_id: &str) -> bool {
        self.inner.handles.read().contains_key(job_id)
    }

    /// Poll until no execution in this process owns the job
    ///
    /// Normally that is once the job is terminal. A queued or running record
    /// left by a previous process has no owner and is returned as it stands.
    pub async fn wait_for_job(&self, job_id: &str) -> AnalysisResult<Job> {
        loop {
            let active = self.is_active(job_id);
            let job = self.status(job_id).await?;
            if !active {
                if !job.is_terminal() {
                    debug!(job_id = %job_id, status = %job.status, "No execution owns this job");
                }
                return Ok(job);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Settle records left behind by a previous process, then prune old ones
    pub async fn recover_interrupted(&self) -> AnalysisResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for job in self.inner.store.list().await? {
            if self.is_active(&job.id) {
                continue;
            }
            let patch = match job.status {
                JobStatus::Running => JobPatch::failed(INTERRUPTED_MESSAGE),
                JobStatus::Queued => JobPatch::status(JobStatus::Cancelled),
                _ => continue,
            };

            match self.inner.store.update(&job.id, patch).await {
                Ok(updated) => {
                    warn!(job_id = %job.id, status = %updated.status, "Recovered interrupted job");
                    match updated.status {
                        JobStatus::Failed => report.failed.push(job.id),
                        _ => report.cancelled.push(job.id),
                    }
                }
                Err(e) if is_discarded(&e) => {}
                Err(e) => return Err(e),
            }
        }

        report.pruned = self
            .inner
            .store
            .prune_finished(self.inner.config.retention)
            .await?;
        Ok(report)
    }

    /// Run the execution on its own task and record any job-level failure
    async fn supervise(self, job_id: String, token: CancellationToken) {
        let runner = self.clone();
        let id = job_id.clone();
        let execution = tokio::spawn(async move { runner.run_job(&id, &token).await });

        let failure = match execution.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(e) => Some(AnalysisError::Orchestration(format!("Job execution aborted: {}", e))),
        };

        if let Some(failure) = failure {
            error!(job_id = %job_id, error = %failure, "Job failed");
            match self
                .inner
                .store
                .update(&job_id, JobPatch::failed(failure.to_string()))
                .await
            {
                Ok(_) => {}
                Err(e) if is_discarded(&e) => {
                    debug!(job_id = %job_id, "Failure not recorded, job already settled")
                }
                Err(e) => error!(job_id = %job_id, error = %e, "Could not record job failure"),
            }
        }

        self.inner.handles.write().remove(&job_id);
    }

    async fn run_job(&self, job_id: &str, token: &CancellationToken) -> AnalysisResult<()> {
        let store = &self.inner.store;
        let job = match store.update(job_id, JobPatch::status(JobStatus::Running)).await {
            Ok(job) => job,
            Err(e) if is_discarded(&e) => return Ok(()),
            Err(e) => return Err(e),
        };
        info!(job_id = %job_id, sheet_id = %job.sheet_id, "Job running");

        let template = self
            .inner
            .templates
            .resolve(
                job.analysis_kind,
                job.custom_goal.as_deref(),
                self.inner.analyzer.as_ref(),
            )
            .await?;
        let template = Arc::new(template);

        let batches: Vec<&[String]> = job.row_ids.chunks(self.inner.config.batch_size).collect();
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            if token.is_cancelled() || store.get(job_id).await?.is_terminal() {
                info!(job_id = %job_id, batch = index, "Stopping before batch, job cancelled");
                return Ok(());
            }

            let Some(outcome) = self.process_batch(&job, &template, batch, token).await else {
                info!(job_id = %job_id, batch = index, "Discarding batch results, job cancelled");
                return Ok(());
            };

            match store
                .update(job_id, JobPatch::progress(outcome.processed, outcome.failed))
                .await
            {
                Ok(_) => {}
                Err(e) if is_discarded(&e) => return Ok(()),
                Err(e) => return Err(e),
            }
            debug!(
                job_id = %job_id,
                batch = index,
                processed = outcome.processed,
                failed = outcome.failed,
                "Batch finished"
            );

            tokio::task::yield_now().await;
            let delay = self.inner.config.batch_delay;
            if !delay.is_zero() && index + 1 < batch_count {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let current = store.get(job_id).await?;
        let progress = current.progress;
        let patch = if progress.total > 0 && progress.failed == progress.total {
            JobPatch::failed(format!("All {} rows failed", progress.total))
        } else {
            JobPatch::status(JobStatus::Completed)
        };

        match store.update(job_id, patch).await {
            Ok(finished) => {
                info!(
                    job_id = %job_id,
                    status = %finished.status,
                    processed = progress.processed,
                    failed = progress.failed,
                    "Job finished"
                );
                Ok(())
            }
            Err(e) if is_discarded(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Analyze and write one batch; `None` when cancelled before the write
    async fn process_batch(
        &self,
        job: &Job,
        template: &Arc<Template>,
        batch: &[String],
        token: &CancellationToken,
    ) -> Option<BatchOutcome> {
        let rows = match self.inner.rows.fetch_rows_by_id(&job.sheet_id, batch).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Batch fetch failed, failing its rows");
                return Some(BatchOutcome {
                    processed: 0,
                    failed: batch.len(),
                });
            }
        };
        let mut by_id: HashMap<String, Row> =
            rows.into_iter().map(|row| (row.id.clone(), row)).collect();

        let mut outcome = BatchOutcome::default();
        let mut handles = Vec::new();

        for row_id in batch {
            let Some(row) = by_id.remove(row_id) else {
                warn!(job_id = %job.id, row_id = %row_id, "Row not found");
                outcome.failed += 1;
                continue;
            };
            let content = row.content(&job.source_columns);
            if content.is_empty() {
                debug!(job_id = %job.id, row_id = %row_id, "Row has no source text");
                outcome.failed += 1;
                continue;
            }

            let analyzer = self.inner.analyzer.clone();
            let template = template.clone();
            let workers = self.inner.workers.clone();
            let token = token.clone();
            let row_id = row_id.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match workers.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let err = CompletionError::new(&row_id, ProviderError::ProviderError(e.to_string()));
                        return (row_id, Some(Err(err)));
                    }
                };
                if token.is_cancelled() {
                    return (row_id, None);
                }
                let result = analyzer.analyze(&row_id, &content, &template).await;
                (row_id, Some(result))
            }));
        }

        let mut successes = Vec::new();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok((row_id, Some(Ok(text)))) => successes.push((row_id, text)),
                Ok((_, Some(Err(e)))) => {
                    warn!(job_id = %job.id, row_id = %e.row_id, error = %e.source, "Row analysis failed");
                    outcome.failed += 1;
                }
                Ok((_, None)) => {}
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Row task aborted");
                    outcome.failed += 1;
                }
            }
        }

        if token.is_cancelled() {
            return None;
        }

        for chunk in successes.chunks(self.inner.config.max_cells_per_write) {
            let updates = chunk
                .iter()
                .map(|(row_id, value)| CellUpdate {
                    row_id: row_id.clone(),
                    column_id: job.target_column.clone(),
                    value: value.clone(),
                })
                .collect();

            match self.inner.rows.bulk_update(&job.sheet_id, updates).await {
                Ok(results) => {
                    let rejected: HashSet<&str> = results
                        .iter()
                        .filter(|r| !r.is_ok())
                        .map(|r| r.row_id.as_str())
                        .collect();
                    let rejected_count = chunk
                        .iter()
                        .filter(|(row_id, _)| rejected.contains(row_id.as_str()))
                        .count();
                    if rejected_count > 0 {
                        warn!(job_id = %job.id, rows = rejected_count, "Row source rejected writes");
                    }
                    outcome.failed += rejected_count;
                    outcome.processed += chunk.len() - rejected_count;
                }
                Err(e) => {
                    let err = AnalysisError::RowSourceWrite(e.to_string());
                    warn!(job_id = %job.id, rows = chunk.len(), error = %err, "Bulk update failed");
                    outcome.failed += chunk.len();
                }
            }
        }

        Some(outcome)
    }
}
