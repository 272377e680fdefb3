//! Cancellation and terminal-state behaviour

mod common;

use std::sync::Arc;

use common::*;
use sheetwise_analysis::testing::ScriptedCompletion;
use sheetwise_analysis::{AnalysisError, AnalysisKind, JobRequest, JobStatus};
use tokio::sync::Semaphore;

fn request() -> JobRequest {
    JobRequest::new(SHEET, AnalysisKind::Summarize, vec!["Notes".into()], "Summary")
}

#[tokio::test]
async fn test_cancel_stops_new_work() {
    let rows = notes_sheet(&["a", "b", "c", "d", "e", "f"]);
    let gate = Arc::new(Semaphore::new(0));
    let completion = Arc::new(ScriptedCompletion::constant("done").with_gate(gate.clone()));
    let (_dir, orch) = orchestrator(rows.clone(), completion.clone(), config(2, 2)).await;

    let job_id = orch.start(request()).await.unwrap();
    eventually(|| completion.call_count() == 2).await;
    assert_eq!(orch.status(&job_id).await.unwrap().status, JobStatus::Running);

    let cancelled = orch.cancel(&job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    // Let the in-flight calls finish
    gate.add_permits(100);
    let job = wait(&orch, &job_id).await;

    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.timestamps.cancelled.is_some());
    assert_eq!(job.progress.resolved(), 0);
    assert_eq!(completion.call_count(), 2);
    assert!(rows.bulk_calls().is_empty());
    assert!(!orch.is_active(&job_id));
}

#[tokio::test]
async fn test_cancel_before_execution_starts() {
    let rows = notes_sheet(&["a", "b"]);
    let completion = Arc::new(ScriptedCompletion::constant("done"));
    let (_dir, orch) = orchestrator(rows.clone(), completion.clone(), config(10, 2)).await;

    // The current-thread runtime has not polled the execution yet
    let job_id = orch.start(request()).await.unwrap();
    assert!(orch.is_active(&job_id));
    orch.cancel(&job_id).await.unwrap();

    let job = wait(&orch, &job_id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(completion.call_count(), 0);
    assert!(rows.bulk_calls().is_empty());
}

#[tokio::test]
async fn test_terminal_jobs_are_immutable() {
    let rows = notes_sheet(&["a"]);
    let (_dir, orch) = orchestrator(
        rows,
        Arc::new(ScriptedCompletion::constant("done")),
        config(10, 1),
    )
    .await;

    let job_id = orch.start(request()).await.unwrap();
    let finished = wait(&orch, &job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);

    for _ in 0..2 {
        assert!(matches!(
            orch.cancel(&job_id).await,
            Err(AnalysisError::InvalidTransition { .. })
        ));
    }
    assert_eq!(orch.status(&job_id).await.unwrap(), finished);
}

#[tokio::test]
async fn test_cancel_twice_is_rejected() {
    let rows = notes_sheet(&["a", "b"]);
    let gate = Arc::new(Semaphore::new(0));
    let completion = Arc::new(ScriptedCompletion::constant("done").with_gate(gate.clone()));
    let (_dir, orch) = orchestrator(rows, completion.clone(), config(1, 1)).await;

    let job_id = orch.start(request()).await.unwrap();
    eventually(|| completion.call_count() == 1).await;
    let first = orch.cancel(&job_id).await.unwrap();
    assert!(matches!(
        orch.cancel(&job_id).await,
        Err(AnalysisError::InvalidTransition {
            from: JobStatus::Cancelled,
            ..
        })
    ));

    gate.add_permits(10);
    let job = wait(&orch, &job_id).await;
    assert_eq!(job.timestamps.cancelled, first.timestamps.cancelled);
}
