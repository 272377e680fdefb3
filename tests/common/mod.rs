//! Shared fixtures for the integration scenarios

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sheetwise_analysis::testing::{InMemoryRowSource, ScriptedCompletion};
use sheetwise_analysis::{
    Job, JobOrchestrator, JobStore, OrchestratorConfig, RetryPolicy, RowAnalyzer,
    TemplateRegistry, TokenCounter,
};
use tempfile::TempDir;

pub const SHEET: &str = "sheet-1";

/// One token per whitespace-separated word
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Sheet with a `Notes` source column (`c-notes`) and a `Summary` target (`c-summary`)
pub fn notes_sheet(texts: &[&str]) -> Arc<InMemoryRowSource> {
    let rows = Arc::new(InMemoryRowSource::new());
    rows.add_sheet(SHEET, &[("c-notes", "Notes"), ("c-summary", "Summary")]);
    for (i, text) in texts.iter().enumerate() {
        rows.add_row(SHEET, &format!("row-{}", i + 1), &[("c-notes", text)]);
    }
    rows
}

pub fn config(batch_size: usize, max_concurrency: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        batch_size,
        max_concurrency,
        ..OrchestratorConfig::default()
    }
}

pub async fn orchestrator_in(
    dir: &TempDir,
    rows: Arc<InMemoryRowSource>,
    completion: Arc<ScriptedCompletion>,
    config: OrchestratorConfig,
    input_budget: usize,
) -> JobOrchestrator {
    let store = JobStore::open(dir.path().join("jobs")).await.unwrap();
    let analyzer = RowAnalyzer::new(completion, Arc::new(WordCounter), Duration::from_secs(5))
        .with_retry_policy(RetryPolicy::no_retry());
    JobOrchestrator::new(store, rows, analyzer, TemplateRegistry::new(input_budget), config)
}

pub async fn orchestrator(
    rows: Arc<InMemoryRowSource>,
    completion: Arc<ScriptedCompletion>,
    config: OrchestratorConfig,
) -> (TempDir, JobOrchestrator) {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator_in(&dir, rows, completion, config, 6000).await;
    (dir, orch)
}

/// Orchestrator over a caller-built analyzer
pub async fn orchestrator_with(
    rows: Arc<InMemoryRowSource>,
    analyzer: RowAnalyzer,
    config: OrchestratorConfig,
    input_budget: usize,
) -> (TempDir, JobOrchestrator) {
    let dir = TempDir::new().unwrap();
    let store = JobStore::open(dir.path().join("jobs")).await.unwrap();
    let templates = TemplateRegistry::new(input_budget);
    let orch = JobOrchestrator::new(store, rows, analyzer, templates, config);
    (dir, orch)
}

pub async fn wait(orch: &JobOrchestrator, job_id: &str) -> Job {
    tokio::time::timeout(Duration::from_secs(10), orch.wait_for_job(job_id))
        .await
        .expect("job did not settle in time")
        .unwrap()
}

/// Poll until `condition` holds or the deadline passes
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
