//! Custom-goal jobs: template synthesis and its failure modes

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use sheetwise_analysis::testing::ScriptedCompletion;
use sheetwise_analysis::{
    AnalysisError, AnalysisKind, JobRequest, JobStatus, RetryPolicy, RowAnalyzer,
};

fn custom(goal: &str) -> JobRequest {
    JobRequest::new(SHEET, AnalysisKind::Custom, vec!["Notes".into()], "Summary")
        .with_custom_goal(goal)
}

#[tokio::test]
async fn test_custom_goal_synthesizes_template_once() {
    let rows = notes_sheet(&["first", "second"]);
    let completion = Arc::new(ScriptedCompletion::new(|request, _| {
        if request.json_mode {
            Ok(serde_json::json!({
                "system_prompt": "You list action items.",
                "task_prompt": "List the action items in: {content}"
            })
            .to_string())
        } else {
            Ok(format!("items for {}", request.user_prompt.rsplit(": ").next().unwrap_or("")))
        }
    }));
    let (_dir, orch) = orchestrator(rows.clone(), completion.clone(), config(10, 2)).await;

    let job = wait(&orch, &orch.start(custom("extract action items")).await.unwrap()).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.custom_goal.as_deref(), Some("extract action items"));

    let calls = completion.calls();
    assert_eq!(calls.iter().filter(|c| c.json_mode).count(), 1);
    assert!(calls[0].json_mode);
    let row_calls: Vec<_> = calls.iter().filter(|c| !c.json_mode).collect();
    assert_eq!(row_calls.len(), 2);
    assert!(row_calls.iter().all(|c| c.system_prompt == "You list action items."));
    assert_eq!(rows.cell(SHEET, "row-1", "c-summary").as_deref(), Some("items for first"));
}

#[tokio::test]
async fn test_synthesis_failure_fails_job_before_row_work() {
    let rows = notes_sheet(&["first", "second"]);
    let completion = Arc::new(ScriptedCompletion::constant("I cannot help with that"));
    let (_dir, orch) = orchestrator(rows.clone(), completion.clone(), config(10, 2)).await;

    let job = wait(&orch, &orch.start(custom("do something")).await.unwrap()).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("Template synthesis failed"));
    assert_eq!(job.progress.resolved(), 0);
    assert_eq!(completion.call_count(), 1);
    assert!(rows.bulk_calls().is_empty());
}

#[tokio::test]
async fn test_custom_without_goal_is_rejected_synchronously() {
    let rows = notes_sheet(&["first"]);
    let completion = Arc::new(ScriptedCompletion::constant("{}"));
    let (_dir, orch) = orchestrator(rows, completion.clone(), config(10, 2)).await;

    let request = JobRequest::new(SHEET, AnalysisKind::Custom, vec!["Notes".into()], "Summary");
    assert!(matches!(orch.start(request).await, Err(AnalysisError::Validation(_))));
    assert_eq!(completion.call_count(), 0);
    assert!(orch.store().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stalled_synthesis_fails_job_after_call_timeout() {
    let rows = notes_sheet(&["first"]);
    let completion = Arc::new(
        ScriptedCompletion::constant("{}").with_delay(Duration::from_secs(30)),
    );
    let analyzer = RowAnalyzer::new(completion.clone(), Arc::new(WordCounter), Duration::from_millis(50))
        .with_retry_policy(RetryPolicy::no_retry());
    let (_dir, orch) = orchestrator_with(rows.clone(), analyzer, config(10, 2), 6000).await;

    let job_id = orch.start(custom("classify urgency")).await.unwrap();
    let job = tokio::time::timeout(Duration::from_secs(2), orch.wait_for_job(&job_id))
        .await
        .expect("stalled synthesis kept the job running")
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.contains("Template synthesis failed"), "{}", error);
    assert!(error.contains("50ms"), "{}", error);
    assert!(!orch.is_active(&job_id));
    assert!(rows.bulk_calls().is_empty());
}
