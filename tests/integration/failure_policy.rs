//! Partial-failure policy and retry tests.
//!
//! `stop_on_failure` decides whether one failed step sinks the workflow or
//! only the branches that depend on it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stepflow::{Step, StepResponse, StepStatus, WorkflowDefinition, WorkflowStatus};

use crate::fixtures::{scheduler, MockBehavior, MockRunner};

fn step(id: &str) -> Step {
    Step::new(id, "worker", &format!("{} task", id))
}

fn failing(id: &str) -> (String, MockBehavior) {
    (
        id.to_string(),
        MockBehavior::Respond(StepResponse::failed("step blew up")),
    )
}

#[tokio::test]
async fn test_stop_on_failure_halts_workflow() {
    let (id, behavior) = failing("a");
    let runner = Arc::new(MockRunner::new().on(&id, behavior));
    let mut wf = WorkflowDefinition::new(
        "wf",
        vec![
            step("a"),
            step("b").depends_on(&["a"]),
            step("c").depends_on(&["a"]),
            step("d").depends_on(&["b", "c"]),
        ],
    );
    assert!(wf.stop_on_failure);

    let result = scheduler(&runner).execute(&mut wf).await;

    assert!(!result.success);
    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(result.failed_step_id.as_deref(), Some("a"));
    assert!(result.error.as_deref().unwrap().contains("a"));
    assert_eq!(result.steps_completed, 0);

    assert_eq!(wf.step("a").unwrap().status, StepStatus::Failed);
    for blocked in ["b", "c", "d"] {
        assert_eq!(wf.step(blocked).unwrap().status, StepStatus::Skipped);
    }
    // Nothing after the failed step was dispatched.
    assert_eq!(runner.started_order(), vec!["a"]);
}

#[tokio::test]
async fn test_continue_on_failure_runs_siblings() {
    let (id, behavior) = failing("a");
    let runner = Arc::new(MockRunner::new().on(&id, behavior));
    let mut wf = WorkflowDefinition::new("wf", vec![step("a"), step("b"), step("c")])
        .stop_on_failure(false);

    let result = scheduler(&runner).execute(&mut wf).await;

    // Independent siblings run to completion; the overall run is still
    // reported as unsuccessful.
    assert!(!result.success);
    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.steps_completed, 2);
    assert_eq!(wf.step("a").unwrap().status, StepStatus::Failed);
    assert_eq!(wf.step("b").unwrap().status, StepStatus::Completed);
    assert_eq!(wf.step("c").unwrap().status, StepStatus::Completed);
}

#[tokio::test]
async fn test_continue_on_failure_blocked_branch_is_stuck() {
    let (id, behavior) = failing("a");
    let runner = Arc::new(MockRunner::new().on(&id, behavior));
    let mut wf = WorkflowDefinition::new(
        "wf",
        vec![step("a"), step("b"), step("d").depends_on(&["a"])],
    )
    .stop_on_failure(false);

    let result = scheduler(&runner).execute(&mut wf).await;

    // b completes, but d can never become ready behind the failed a.
    assert!(!result.success);
    assert_eq!(result.status, WorkflowStatus::Failed);
    assert!(result.error.as_deref().unwrap().contains("stuck"));
    assert_eq!(wf.step("b").unwrap().status, StepStatus::Completed);
    assert_eq!(wf.step("d").unwrap().status, StepStatus::Skipped);
}

#[tokio::test]
async fn test_retry_recovers_transient_failure() {
    let runner = Arc::new(MockRunner::new().on(
        "flaky",
        MockBehavior::FailTimes {
            remaining: 2,
            then: StepResponse::ok(json!("recovered")),
        },
    ));
    let mut wf = WorkflowDefinition::new(
        "wf",
        vec![
            Step::new("flaky", "worker", "flaky task").with_retries(3, Duration::ZERO),
            step("after").depends_on(&["flaky"]),
        ],
    );

    let result = scheduler(&runner).execute(&mut wf).await;

    assert!(result.success);
    let flaky = wf.step("flaky").unwrap();
    assert_eq!(flaky.status, StepStatus::Completed);
    assert_eq!(flaky.retry_attempts, 2);
    assert_eq!(flaky.result, Some(json!("recovered")));
    assert_eq!(wf.step("after").unwrap().status, StepStatus::Completed);
}

#[tokio::test]
async fn test_retries_exhausted_fails_step() {
    let runner = Arc::new(MockRunner::new().on(
        "flaky",
        MockBehavior::FailTimes {
            remaining: 99,
            then: StepResponse::ok(json!("unreachable")),
        },
    ));
    let mut wf = WorkflowDefinition::new(
        "wf",
        vec![Step::new("flaky", "worker", "flaky task").with_retries(2, Duration::ZERO)],
    );

    let result = scheduler(&runner).execute(&mut wf).await;

    assert!(!result.success);
    let flaky = wf.step("flaky").unwrap();
    assert_eq!(flaky.status, StepStatus::Failed);
    assert_eq!(flaky.retry_attempts, 2);
    assert_eq!(flaky.error_message.as_deref(), Some("transient failure"));
    // First attempt plus two retries.
    assert_eq!(runner.started_order().len(), 3);
}
