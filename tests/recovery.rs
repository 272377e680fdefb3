//! Restart recovery over a persisted jobs directory

mod common;

use std::sync::Arc;

use common::*;
use sheetwise_analysis::testing::ScriptedCompletion;
use sheetwise_analysis::{AnalysisKind, Job, JobPatch, JobStatus, JobStore};
use tempfile::TempDir;

fn job(rows: &[&str]) -> Job {
    Job::new(
        SHEET,
        AnalysisKind::Summarize,
        None,
        vec!["c-notes".to_string()],
        "c-summary",
        rows.iter().map(|r| r.to_string()).collect(),
    )
}

#[tokio::test]
async fn test_running_job_is_failed_after_restart() {
    let dir = TempDir::new().unwrap();

    // A previous process left these behind
    let (running, queued, done) = {
        let store = JobStore::open(dir.path().join("jobs")).await.unwrap();
        let running = job(&["row-1", "row-2"]);
        store.create(&running).await.unwrap();
        store.update(&running.id, JobPatch::status(JobStatus::Running)).await.unwrap();
        store.update(&running.id, JobPatch::progress(1, 0)).await.unwrap();

        let queued = job(&["row-1"]);
        store.create(&queued).await.unwrap();

        let done = job(&["row-1"]);
        store.create(&done).await.unwrap();
        store.update(&done.id, JobPatch::status(JobStatus::Running)).await.unwrap();
        store.update(&done.id, JobPatch::progress(1, 0)).await.unwrap();
        store.update(&done.id, JobPatch::status(JobStatus::Completed)).await.unwrap();
        (running, queued, done)
    };

    let rows = notes_sheet(&["one", "two"]);
    let completion = Arc::new(ScriptedCompletion::constant("x"));
    let orch = orchestrator_in(&dir, rows.clone(), completion.clone(), config(10, 2), 6000).await;

    let report = orch.recover_interrupted().await.unwrap();
    assert_eq!(report.failed, vec![running.id.clone()]);
    assert_eq!(report.cancelled, vec![queued.id.clone()]);
    assert_eq!(report.pruned, 0);

    let recovered = orch.status(&running.id).await.unwrap();
    assert_eq!(recovered.status, JobStatus::Failed);
    assert!(recovered.error.as_deref().unwrap().contains("interrupted"));
    assert_eq!(recovered.progress.processed, 1);
    assert_eq!(orch.status(&queued.id).await.unwrap().status, JobStatus::Cancelled);
    assert_eq!(orch.status(&done.id).await.unwrap().status, JobStatus::Completed);

    assert_eq!(completion.call_count(), 0);
    assert!(rows.bulk_calls().is_empty());

    // Nothing left to recover
    let again = orch.recover_interrupted().await.unwrap();
    assert!(again.failed.is_empty() && again.cancelled.is_empty());
}

#[tokio::test]
async fn test_recovery_prunes_expired_jobs() {
    let dir = TempDir::new().unwrap();
    let store = JobStore::open(dir.path().join("jobs")).await.unwrap();

    let mut old = job(&["row-1"]);
    old.status = JobStatus::Cancelled;
    old.timestamps.cancelled = Some(chrono::Utc::now() - chrono::Duration::days(30));
    store.create(&old).await.unwrap();
    drop(store);

    let orch = orchestrator_in(
        &dir,
        notes_sheet(&["one"]),
        Arc::new(ScriptedCompletion::constant("x")),
        config(10, 2),
        6000,
    )
    .await;

    let report = orch.recover_interrupted().await.unwrap();
    assert_eq!(report.pruned, 1);
    assert!(orch.status(&old.id).await.is_err());
}

#[tokio::test]
async fn test_recovery_leaves_live_jobs_alone() {
    let rows = notes_sheet(&["one"]);
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let completion = Arc::new(ScriptedCompletion::constant("x").with_gate(gate.clone()));
    let (_dir, orch) = orchestrator(rows, completion.clone(), config(10, 1)).await;

    let request = sheetwise_analysis::JobRequest::new(
        SHEET,
        AnalysisKind::Summarize,
        vec!["Notes".into()],
        "Summary",
    );
    let job_id = orch.start(request).await.unwrap();
    eventually(|| completion.call_count() == 1).await;

    let report = orch.recover_interrupted().await.unwrap();
    assert!(report.failed.is_empty());

    gate.add_permits(1);
    assert_eq!(wait(&orch, &job_id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_wait_returns_for_records_without_an_execution() {
    let dir = TempDir::new().unwrap();
    let orphan = job(&["row-1"]);
    {
        let store = JobStore::open(dir.path().join("jobs")).await.unwrap();
        store.create(&orphan).await.unwrap();
        store.update(&orphan.id, JobPatch::status(JobStatus::Running)).await.unwrap();
    }

    let orch = orchestrator_in(
        &dir,
        notes_sheet(&["one"]),
        Arc::new(ScriptedCompletion::constant("x")),
        config(10, 2),
        6000,
    )
    .await;

    assert!(!orch.is_active(&orphan.id));
    let waited = wait(&orch, &orphan.id).await;
    assert_eq!(waited.status, JobStatus::Running);

    orch.recover_interrupted().await.unwrap();
    assert_eq!(wait(&orch, &orphan.id).await.status, JobStatus::Failed);
}
