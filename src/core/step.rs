//! Step data model for the workflow graph.
//!
//! Steps are the atomic units of work delegated to task runners. Each step
//! tracks its status, dependency edges, input/output data, and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Default per-step execution ceiling.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// Default delay between retry attempts.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Step status in its lifecycle.
///
/// Steps start Pending and progress as the scheduler dispatches them.
/// Once a step leaves Pending it never returns to Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step created but dependencies not yet satisfied.
    Pending,
    /// Step is currently being executed by a task runner.
    Running,
    /// Step completed successfully.
    Completed,
    /// Step failed (runner error, runner-reported failure, or timeout).
    Failed,
    /// Step was never dispatched because the workflow terminated first.
    Skipped,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A single step in a workflow.
///
/// Each step names the task runner that executes it, the steps it depends
/// on, and the inputs it receives. Input values may be literals or
/// `$source.key` reference strings resolved just before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier within the workflow (used for references).
    pub id: String,
    /// Name of the task runner that executes this step.
    pub runner: String,
    /// Free-text description of the work; opaque to the scheduler.
    pub task: String,
    /// Ids of steps that must complete before this one is ready.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Input parameters (literal values or unresolved references).
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    /// Output data populated after execution.
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    /// Steps sharing a non-null tag are dispatched concurrently as one unit.
    pub parallel_group: Option<String>,
    /// Max execution time per attempt.
    pub timeout_secs: u64,
    /// Number of retries after the first failed attempt.
    pub retry_count: u32,
    /// Delay between retry attempts.
    pub retry_delay_secs: u64,
    /// Current lifecycle status.
    pub status: StepStatus,
    /// When the step was created.
    pub created_at: DateTime<Utc>,
    /// When the step started execution.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration of the final attempt.
    pub duration_secs: Option<f64>,
    /// Free-form result payload from the runner.
    pub result: Option<Value>,
    /// Findings produced by the runner.
    #[serde(default)]
    pub findings: Vec<Value>,
    /// Change plan produced by the runner.
    pub change_plan: Option<Value>,
    /// Evaluation result produced by the runner.
    pub eval_result: Option<Value>,
    /// Error message when the step failed.
    pub error_message: Option<String>,
    /// How many retry attempts were actually made.
    pub retry_attempts: u32,
}

impl Step {
    /// Create a new step bound to a task runner.
    ///
    /// The step is created Pending with default timeout and retry policy.
    pub fn new(id: &str, runner: &str, task: &str) -> Self {
        Self {
            id: id.to_string(),
            runner: runner.to_string(),
            task: task.to_string(),
            depends_on: Vec::new(),
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            parallel_group: None,
            timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            retry_count: 0,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            status: StepStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_secs: None,
            result: None,
            findings: Vec::new(),
            change_plan: None,
            eval_result: None,
            error_message: None,
            retry_attempts: 0,
        }
    }

    /// Add dependency edges (builder style).
    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Add an input parameter (builder style).
    pub fn with_input(mut self, key: &str, value: Value) -> Self {
        self.inputs.insert(key.to_string(), value);
        self
    }

    /// Set the parallel group tag (builder style).
    pub fn in_group(mut self, group: &str) -> Self {
        self.parallel_group = Some(group.to_string());
        self
    }

    /// Set the per-attempt timeout (builder style).
    ///
    /// Timeouts are stored at whole-second granularity; sub-second values
    /// round up so a short but valid timeout never collapses to zero.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = whole_secs(timeout);
        self
    }

    /// Set the retry policy (builder style). The delay rounds up to whole
    /// seconds like `with_timeout`; `Duration::ZERO` stays zero.
    pub fn with_retries(mut self, count: u32, delay: Duration) -> Self {
        self.retry_count = count;
        self.retry_delay_secs = whole_secs(delay);
        self
    }

    /// Per-attempt timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry delay as a Duration.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Start the step execution.
    ///
    /// Transitions status to Running and records the start time.
    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the step as successfully completed.
    pub fn complete(&mut self) {
        self.status = StepStatus::Completed;
        self.finish_timing();
    }

    /// Mark the step as failed with an error message.
    pub fn fail(&mut self, error: &str) {
        self.status = StepStatus::Failed;
        self.error_message = Some(error.to_string());
        self.finish_timing();
    }

    /// Mark the step as skipped (workflow terminated before dispatch).
    pub fn skip(&mut self) {
        self.status = StepStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }

    fn finish_timing(&mut self) {
        let now = Utc::now();
        if let Some(started) = self.started_at {
            self.duration_secs = Some((now - started).num_milliseconds() as f64 / 1000.0);
        }
        self.completed_at = Some(now);
    }

    /// Check if the step is in a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// Seconds rounded up, so nonzero durations never truncate to zero.
fn whole_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
