//! Timeout and cancellation tests.
//!
//! These run with paused virtual time so multi-second ceilings resolve
//! instantly.

use std::sync::Arc;
use std::time::Duration;

use stepflow::{Step, StepStatus, WorkflowDefinition, WorkflowStatus};

use crate::fixtures::{scheduler, MockBehavior, MockRunner};

fn step(id: &str) -> Step {
    Step::new(id, "worker", &format!("{} task", id))
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_fails_step() {
    let runner = Arc::new(
        MockRunner::new().on("slow", MockBehavior::Hang(Duration::from_secs(3600))),
    );
    let mut wf = WorkflowDefinition::new(
        "wf",
        vec![Step::new("slow", "worker", "slow task").with_timeout(Duration::from_secs(2))],
    );

    let result = scheduler(&runner).execute(&mut wf).await;

    assert!(!result.success);
    assert_eq!(result.status, WorkflowStatus::Failed);
    let slow = wf.step("slow").unwrap();
    assert_eq!(slow.status, StepStatus::Failed);
    assert_eq!(
        slow.error_message.as_deref(),
        Some("Step timed out after 2s")
    );
}

#[tokio::test(start_paused = true)]
async fn test_subsecond_timeout_rounds_up_to_one_second() {
    let runner = Arc::new(MockRunner::new().with_delay(Duration::from_millis(50)));
    let mut wf = WorkflowDefinition::new(
        "wf",
        vec![Step::new("quick", "worker", "quick task")
            .with_timeout(Duration::from_millis(900))],
    );
    // Sub-second timeouts round up rather than truncating to an instant 0s.
    assert_eq!(wf.step("quick").unwrap().timeout_secs, 1);

    let result = scheduler(&runner).execute(&mut wf).await;

    assert!(result.success);
    assert_eq!(wf.step("quick").unwrap().status, StepStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_retries_then_fails() {
    let runner = Arc::new(
        MockRunner::new().on("slow", MockBehavior::Hang(Duration::from_secs(3600))),
    );
    let mut wf = WorkflowDefinition::new(
        "wf",
        vec![Step::new("slow", "worker", "slow task")
            .with_timeout(Duration::from_secs(1))
            .with_retries(2, Duration::from_secs(1))],
    );

    let result = scheduler(&runner).execute(&mut wf).await;

    assert!(!result.success);
    let slow = wf.step("slow").unwrap();
    assert_eq!(slow.retry_attempts, 2);
    // Every attempt was dispatched to the runner.
    assert_eq!(runner.started_order().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_workflow_timeout_supervises_run() {
    let runner = Arc::new(
        MockRunner::new().on("slow", MockBehavior::Hang(Duration::from_secs(7200))),
    );
    let mut wf = WorkflowDefinition::new(
        "wf",
        vec![
            step("fast"),
            Step::new("slow", "worker", "slow task")
                .depends_on(&["fast"])
                .with_timeout(Duration::from_secs(7200)),
            step("never").depends_on(&["slow"]),
        ],
    );
    wf.timeout_secs = 5;

    let result = scheduler(&runner).execute_with_timeout(&mut wf).await;

    assert!(!result.success);
    assert_eq!(result.status, WorkflowStatus::Timeout);
    assert_eq!(
        result.error.as_deref(),
        Some("Workflow timed out after 5s")
    );
    assert_eq!(wf.step("fast").unwrap().status, StepStatus::Completed);
    // The in-flight step is failed, the undispatched one skipped.
    assert_eq!(wf.step("slow").unwrap().status, StepStatus::Failed);
    assert_eq!(wf.step("never").unwrap().status, StepStatus::Skipped);
}

#[tokio::test(start_paused = true)]
async fn test_workflow_timeout_not_hit() {
    let runner = Arc::new(MockRunner::new().with_delay(Duration::from_secs(1)));
    let mut wf =
        WorkflowDefinition::new("wf", vec![step("a"), step("b").depends_on(&["a"])]);
    wf.timeout_secs = 300;

    let result = scheduler(&runner).execute_with_timeout(&mut wf).await;

    assert!(result.success);
    assert_eq!(result.status, WorkflowStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_at_batch_boundary() {
    let runner = Arc::new(MockRunner::new().with_delay(Duration::from_secs(2)));
    let mut scheduler = scheduler(&runner);
    let token = scheduler.cancellation_token();

    tokio::spawn(async move {
        // Fires while step a is still running.
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    });

    let mut wf =
        WorkflowDefinition::new("wf", vec![step("a"), step("b").depends_on(&["a"])]);
    let result = scheduler.execute(&mut wf).await;

    assert!(!result.success);
    assert_eq!(result.status, WorkflowStatus::Cancelled);
    assert_eq!(result.error.as_deref(), Some("Workflow cancelled"));
    // The in-flight step finished its batch; the dependent never started.
    assert_eq!(wf.step("a").unwrap().status, StepStatus::Completed);
    assert_eq!(wf.step("b").unwrap().status, StepStatus::Skipped);
}
