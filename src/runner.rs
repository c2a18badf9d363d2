//! Task runner boundary.
//!
//! The scheduler delegates each step's actual work to a named task runner.
//! Runners are opaque asynchronous capabilities: the engine never inspects
//! their output payloads beyond storing them and exposing them to later
//! reference lookups.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// What the scheduler hands a runner for one step execution.
#[derive(Debug, Clone)]
pub struct StepRequest {
    /// Id of the workflow being executed.
    pub workflow_id: String,
    /// Id of the step being executed.
    pub step_id: String,
    /// Free-text work description from the step.
    pub task: String,
    /// Inputs with all references already resolved.
    pub inputs: HashMap<String, Value>,
    /// The per-attempt deadline the scheduler will enforce. Runners may use
    /// it to budget their own work; enforcement happens in the scheduler.
    pub timeout: Duration,
}

/// Token usage reported by a runner, priced by the cost ledger.
#[derive(Debug, Clone, Default)]
pub struct RunnerUsage {
    /// Model identifier used for pricing; empty means the runner's default.
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// What a runner returns for one step execution.
#[derive(Debug, Clone, Default)]
pub struct StepResponse {
    /// Whether the step's work succeeded.
    pub success: bool,
    /// Free-form result payload, stored as the step's `result`.
    pub output: Option<Value>,
    /// Named outputs, merged into the step's `outputs` map.
    pub outputs: HashMap<String, Value>,
    /// Findings produced by the runner.
    pub findings: Vec<Value>,
    /// Change plan produced by the runner.
    pub change_plan: Option<Value>,
    /// Evaluation result produced by the runner.
    pub eval_result: Option<Value>,
    /// Error description when `success` is false.
    pub error: Option<String>,
    /// Token usage for cost accounting.
    pub usage: RunnerUsage,
}

impl StepResponse {
    /// A successful response with the given result payload.
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            ..Default::default()
        }
    }

    /// A failed response with the given error message.
    pub fn failed(error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Attach usage to the response (builder style).
    pub fn with_usage(mut self, model: &str, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = RunnerUsage {
            model: model.to_string(),
            input_tokens,
            output_tokens,
        };
        self
    }
}

/// A pluggable executor that performs the actual work for a step.
///
/// Runner errors are caught at the per-step boundary and converted to step
/// failures; they never abort sibling steps in the same batch.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// The model identifier used for pricing when the runner does not
    /// report one with its usage.
    fn model(&self) -> &str;

    /// Execute one step's work.
    async fn execute(&self, request: StepRequest) -> crate::Result<StepResponse>;
}

/// Registry of named task runners the scheduler dispatches to.
#[derive(Clone, Default)]
pub struct RunnerRegistry {
    runners: HashMap<String, Arc<dyn TaskRunner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner under a name; replaces any existing registration.
    pub fn register(&mut self, name: &str, runner: Arc<dyn TaskRunner>) {
        self.runners.insert(name.to_string(), runner);
    }

    /// Look up a runner by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskRunner>> {
        self.runners.get(name).cloned()
    }

    /// Look up a runner by name, failing when it is not registered.
    pub fn require(&self, name: &str) -> crate::Result<Arc<dyn TaskRunner>> {
        self.get(name)
            .ok_or_else(|| crate::Error::RunnerNotFound(name.to_string()))
    }

    /// Names of all registered runners.
    pub fn names(&self) -> Vec<&str> {
        self.runners.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

impl std::fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("runners", &self.names())
            .finish()
    }
}
