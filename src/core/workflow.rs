//! Workflow definition and step-graph queries.
//!
//! A `WorkflowDefinition` holds the step graph, global inputs, and the
//! execution knobs the scheduler honors. It answers the "which steps are
//! ready now" query and validates graphs before any step runs.

use crate::core::step::{Step, StepStatus};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Default total workflow timeout.
pub const DEFAULT_WORKFLOW_TIMEOUT_SECS: u64 = 3600;

/// Status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Not yet started.
    Pending,
    /// Currently executing.
    Running,
    /// Successfully finished.
    Completed,
    /// Failed with error.
    Failed,
    /// Cancelled via the scheduler's cancellation token.
    Cancelled,
    /// Exceeded the workflow-level time ceiling.
    Timeout,
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl WorkflowStatus {
    /// Check if the status is terminal; the workflow is immutable after.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::Cancelled
                | WorkflowStatus::Timeout
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
            WorkflowStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// A complete workflow: step graph, global inputs, and execution settings.
///
/// Created once by the caller (or a goal decomposer), mutated exclusively
/// by the scheduler during `execute`, immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow identifier, generated as `WF-XXXXXXXX` when not supplied.
    pub id: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Ordered list of steps.
    pub steps: Vec<Step>,
    /// Workflow-level inputs referenced via `$workflow.<key>`.
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    /// Total workflow timeout, enforced by an enclosing supervisor.
    pub timeout_secs: u64,
    /// Concurrency cap for ungrouped steps.
    pub max_parallel_steps: usize,
    /// Stop the workflow on the first step failure.
    pub stop_on_failure: bool,
    /// Workflow-level status.
    pub status: WorkflowStatus,
    /// Id of the step most recently dispatched.
    pub current_step_id: Option<String>,
    /// When the workflow was created.
    pub created_at: DateTime<Utc>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the workflow reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Cumulative cost recorded during the run.
    pub total_cost_usd: f64,
    /// Cumulative token usage recorded during the run.
    pub total_tokens: u64,
    /// Terminal error message, if any.
    pub error_message: Option<String>,
    /// Id of the step whose failure terminated the workflow.
    pub failed_step_id: Option<String>,
}

fn generate_id() -> String {
    let uuid = Uuid::new_v4().to_string();
    format!("WF-{}", uuid[..8].to_uppercase())
}

impl WorkflowDefinition {
    /// Create a new workflow with the given name and steps.
    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            id: generate_id(),
            name: name.to_string(),
            description: None,
            steps,
            inputs: HashMap::new(),
            timeout_secs: DEFAULT_WORKFLOW_TIMEOUT_SECS,
            max_parallel_steps: crate::config::DEFAULT_MAX_PARALLEL_STEPS,
            stop_on_failure: true,
            status: WorkflowStatus::Pending,
            current_step_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            total_cost_usd: 0.0,
            total_tokens: 0,
            error_message: None,
            failed_step_id: None,
        }
    }

    /// Set a workflow-level input (builder style).
    pub fn with_input(mut self, key: &str, value: Value) -> Self {
        self.inputs.insert(key.to_string(), value);
        self
    }

    /// Set the failure policy (builder style).
    pub fn stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    /// Set the concurrency cap for ungrouped steps (builder style).
    pub fn max_parallel(mut self, cap: usize) -> Self {
        self.max_parallel_steps = cap;
        self
    }

    /// Get a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Get a mutable step by id.
    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Number of steps in the workflow.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Number of steps that completed successfully.
    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// Number of steps still Pending.
    pub fn pending_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .count()
    }

    /// Number of steps currently Running.
    pub fn running_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Running)
            .count()
    }

    /// Completion progress as a percentage.
    pub fn progress_percent(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        (self.completed_steps() as f64 / self.steps.len() as f64) * 100.0
    }

    /// Get steps that are ready to execute.
    ///
    /// A step is ready when it is Pending and every id in `depends_on`
    /// resolves to a Completed step. A dependency on a nonexistent id is
    /// vacuously satisfied; `validate` flags those before any step runs.
    /// Pure query, no side effects.
    pub fn ready_steps(&self) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|step| {
                if step.status != StepStatus::Pending {
                    return false;
                }
                step.depends_on.iter().all(|dep_id| {
                    self.step(dep_id)
                        .map(|dep| dep.status == StepStatus::Completed)
                        .unwrap_or(true)
                })
            })
            .collect()
    }

    /// Validate the step graph before execution.
    ///
    /// Rejects duplicate step ids, dependencies on unknown ids, and cyclic
    /// dependency graphs. Cycles are detected with a topological sort so a
    /// bad graph is refused at submission time instead of deadlocking at
    /// runtime.
    pub fn validate(&self) -> Result<()> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut indices = HashMap::new();

        for step in &self.steps {
            if indices.contains_key(step.id.as_str()) {
                return Err(Error::DuplicateStep(step.id.clone()));
            }
            let index = graph.add_node(step.id.as_str());
            indices.insert(step.id.as_str(), index);
        }

        for step in &self.steps {
            for dep_id in &step.depends_on {
                let dep_index =
                    *indices
                        .get(dep_id.as_str())
                        .ok_or_else(|| Error::UnknownDependency {
                            step: step.id.clone(),
                            dependency: dep_id.clone(),
                        })?;
                graph.add_edge(dep_index, indices[step.id.as_str()], ());
            }
        }

        toposort(&graph, None).map_err(|cycle| {
            let step_id = graph
                .node_weight(cycle.node_id())
                .copied()
                .unwrap_or("unknown");
            Error::CycleDetected(step_id.to_string())
        })?;

        Ok(())
    }
}

impl std::fmt::Display for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({:.0}% complete)",
            self.status, self.id, self.name, self.progress_percent()
        )
    }
}
