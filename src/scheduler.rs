//! Scheduler for dependency-aware workflow execution.
//!
//! The Scheduler drives one workflow to a terminal state: it computes ready
//! steps, dispatches parallel groups as fan-out/fan-in batches and ungrouped
//! steps one at a time under the concurrency cap, applies per-step timeouts
//! and retries, gates every batch on the cost ledger's budget, and enforces
//! the partial-failure policy.

use crate::core::step::StepStatus;
use crate::core::workflow::{WorkflowDefinition, WorkflowStatus};
use crate::cost::CostLedger;
use crate::resolve;
use crate::runner::{RunnerRegistry, StepRequest, StepResponse, TaskRunner};
use crate::{sflog, sflog_debug, sflog_warn};
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Events emitted by the scheduler for step lifecycle changes.
///
/// These events allow external components to react to state changes
/// without polling the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A step has been dispatched to its task runner.
    StepStarted {
        /// The step that was started.
        step_id: String,
        /// The runner it was dispatched to.
        runner: String,
    },
    /// A step completed successfully.
    StepCompleted {
        /// The step that completed.
        step_id: String,
    },
    /// A step failed after exhausting its retries.
    StepFailed {
        /// The step that failed.
        step_id: String,
        /// Error message describing the failure.
        error: String,
    },
    /// The workflow reached a terminal status.
    WorkflowFinished {
        /// The workflow that finished.
        workflow_id: String,
        /// Its terminal status.
        status: WorkflowStatus,
    },
}

/// Aggregated result of executing a complete workflow.
///
/// Always returned, never thrown: step failures, budget exhaustion, and
/// stuck graphs all land here rather than propagating as errors.
#[derive(Debug, Clone)]
pub struct WorkflowExecutionResult {
    /// Id of the executed workflow.
    pub workflow_id: String,
    /// True when every executed step completed successfully.
    pub success: bool,
    /// The workflow's terminal status.
    pub status: WorkflowStatus,
    /// Number of steps that reached Completed.
    pub steps_completed: usize,
    /// Total number of steps in the workflow.
    pub total_steps: usize,
    /// Findings collected from all steps.
    pub findings: Vec<Value>,
    /// Change plans collected from all steps.
    pub change_plans: Vec<Value>,
    /// Evaluation results collected from all steps.
    pub eval_results: Vec<Value>,
    /// Total cost recorded during the run.
    pub total_cost_usd: f64,
    /// Total token usage recorded during the run.
    pub total_tokens: u64,
    /// Wall-clock duration of the run.
    pub duration_secs: f64,
    /// Terminal error message, if any.
    pub error: Option<String>,
    /// Id of the step whose failure terminated the workflow.
    pub failed_step_id: Option<String>,
}

/// A step prepared for dispatch: everything the execution future needs,
/// owned, so the batch can run without borrowing the workflow.
struct StepInvocation {
    step_id: String,
    runner_name: String,
    default_model: String,
    runner: Arc<dyn TaskRunner>,
    request: StepRequest,
    retry_count: u32,
    retry_delay: Duration,
}

/// Outcome of one step execution, applied back to the workflow after the
/// batch completes.
struct StepOutcome {
    step_id: String,
    runner_name: String,
    default_model: String,
    response: Option<StepResponse>,
    error: Option<String>,
    /// Retries made beyond the first attempt.
    retry_attempts: u32,
    /// Usage from every attempt, including failed ones.
    usages: Vec<crate::runner::RunnerUsage>,
}

impl StepOutcome {
    fn succeeded(&self) -> bool {
        self.response.as_ref().map(|r| r.success).unwrap_or(false)
    }
}

/// Drives one workflow to a terminal state.
///
/// The scheduler owns the runner registry and the cost ledger for the
/// duration of a run; no external mutation is permitted while a run is in
/// progress. One scheduler executes one workflow at a time; use separate
/// instances for concurrent workflows.
pub struct Scheduler {
    runners: RunnerRegistry,
    ledger: CostLedger,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler with the given runners and cost ledger.
    pub fn new(runners: RunnerRegistry, ledger: CostLedger) -> Self {
        Self {
            runners,
            ledger,
            event_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Create a scheduler whose ledger follows the given configuration:
    /// budget, alert thresholds, and optional on-disk persistence. Also
    /// initializes the log file sink.
    pub fn from_config(runners: RunnerRegistry, config: &crate::Config) -> crate::Result<Self> {
        crate::log::init();
        let mut ledger = CostLedger::new(config.budget_usd);
        if let Some(thresholds) = &config.alert_thresholds {
            ledger = ledger.with_thresholds(thresholds.clone());
        }
        if let Some(path) = config.ledger_file()? {
            ledger = ledger.with_persistence(path);
        }
        Ok(Self::new(runners, ledger))
    }

    /// Attach an event channel (builder style).
    pub fn with_events(mut self, tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// A token that cancels the run at the next batch boundary.
    ///
    /// Steps already in flight finish their batch; nothing new dispatches.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The scheduler's cost ledger.
    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    async fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Execute a workflow to a terminal state.
    ///
    /// The loop: compute ready steps; if none remain the workflow is done,
    /// if none are ready but pending steps remain the graph is stuck;
    /// otherwise dispatch parallel groups as whole batches and ungrouped
    /// steps one at a time up to `max_parallel_steps`. After each batch the
    /// budget gate runs (fatal regardless of `stop_on_failure`), then the
    /// failure policy.
    ///
    /// Step failures never propagate as errors; they are recorded on the
    /// step and in the aggregate result.
    pub async fn execute(&mut self, workflow: &mut WorkflowDefinition) -> WorkflowExecutionResult {
        sflog!("Executing workflow {}: {}", workflow.id, workflow.name);
        let started = Instant::now();
        workflow.status = WorkflowStatus::Running;
        workflow.started_at = Some(Utc::now());

        loop {
            if self.cancel.is_cancelled() {
                workflow.status = WorkflowStatus::Cancelled;
                workflow.error_message = Some("Workflow cancelled".to_string());
                break;
            }

            let ready: Vec<String> = workflow
                .ready_steps()
                .iter()
                .map(|s| s.id.clone())
                .collect();

            if ready.is_empty() {
                if workflow.pending_steps() == 0 {
                    // All steps dispatched; natural completion.
                    break;
                }
                if workflow.running_steps() == 0 {
                    // Pending steps remain but nothing can unblock them:
                    // cyclic dependencies or a failed dependency.
                    workflow.status = WorkflowStatus::Failed;
                    workflow.error_message =
                        Some("Workflow stuck: steps have unmet dependencies".to_string());
                    break;
                }
                // Batches are awaited to completion before re-polling, so
                // in-flight steps without ready work cannot occur today.
                tokio::task::yield_now().await;
                continue;
            }

            // Partition ready steps into parallel groups and ungrouped
            // (sequential) steps, preserving list order.
            let mut groups: Vec<(String, Vec<String>)> = Vec::new();
            let mut sequential: Vec<String> = Vec::new();
            for id in ready {
                match workflow.step(&id).and_then(|s| s.parallel_group.clone()) {
                    Some(group) => match groups.iter_mut().find(|(g, _)| *g == group) {
                        Some((_, ids)) => ids.push(id),
                        None => groups.push((group, vec![id])),
                    },
                    None => sequential.push(id),
                }
            }

            // Fatal step failures observed in this scheduler pass.
            let mut batch_failures: Vec<(String, String)> = Vec::new();

            // Fan out each parallel group and await the whole group. One
            // member's failure does not cancel its siblings.
            for (group, ids) in groups {
                sflog_debug!("Dispatching parallel group {} ({} steps)", group, ids.len());
                let mut invocations = Vec::new();
                for id in ids {
                    match self.prepare(workflow, &id).await {
                        Some(invocation) => invocations.push(invocation),
                        None => self.apply_missing_runner(workflow, &id, &mut batch_failures).await,
                    }
                }
                let outcomes = join_all(invocations.into_iter().map(run_invocation)).await;
                for outcome in outcomes {
                    self.apply_outcome(workflow, outcome, &mut batch_failures).await;
                }
            }

            // Ungrouped steps run one at a time, capped per pass; the
            // remainder waits for the next loop iteration.
            let cap = workflow.max_parallel_steps.max(1);
            for id in sequential.into_iter().take(cap) {
                if workflow.stop_on_failure && !batch_failures.is_empty() {
                    break;
                }
                match self.prepare(workflow, &id).await {
                    Some(invocation) => {
                        let outcome = run_invocation(invocation).await;
                        self.apply_outcome(workflow, outcome, &mut batch_failures).await;
                    }
                    None => self.apply_missing_runner(workflow, &id, &mut batch_failures).await,
                }
            }

            // Budget gate: fatal regardless of stop_on_failure.
            if self.ledger.is_over_budget() {
                workflow.status = WorkflowStatus::Failed;
                workflow.error_message = Some("Budget exceeded".to_string());
                break;
            }

            if workflow.stop_on_failure {
                if let Some((step_id, error)) = batch_failures.into_iter().next() {
                    workflow.status = WorkflowStatus::Failed;
                    workflow.failed_step_id = Some(step_id.clone());
                    workflow.error_message =
                        Some(format!("Step {} failed: {}", step_id, error));
                    break;
                }
            }
        }

        if !workflow.status.is_terminal() {
            // Natural completion: no pending steps, none failed fatally.
            workflow.status = WorkflowStatus::Completed;
        }
        workflow.completed_at = Some(Utc::now());

        self.finalize(workflow, started.elapsed()).await
    }

    /// Execute with the workflow-level time ceiling enforced.
    ///
    /// The ceiling is applied as an enclosing supervisor around the inner
    /// loop. When it fires, in-flight step futures are dropped; running
    /// steps are marked failed and the workflow ends with Timeout status.
    pub async fn execute_with_timeout(
        &mut self,
        workflow: &mut WorkflowDefinition,
    ) -> WorkflowExecutionResult {
        let ceiling = Duration::from_secs(workflow.timeout_secs);
        let started = Instant::now();
        let outcome = tokio::time::timeout(ceiling, self.execute(workflow)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                sflog_warn!("Workflow {} timed out after {:?}", workflow.id, ceiling);
                let message = format!("Workflow timed out after {}s", workflow.timeout_secs);
                for step in workflow.steps.iter_mut() {
                    if step.status == StepStatus::Running {
                        step.fail(&message);
                    }
                }
                workflow.status = WorkflowStatus::Timeout;
                workflow.error_message = Some(message);
                workflow.completed_at = Some(Utc::now());
                self.finalize(workflow, started.elapsed()).await
            }
        }
    }

    /// Resolve inputs and mark a step Running, producing the owned
    /// invocation the batch future executes. Returns None when the step's
    /// runner is not registered.
    async fn prepare(
        &self,
        workflow: &mut WorkflowDefinition,
        step_id: &str,
    ) -> Option<StepInvocation> {
        let step = workflow.step(step_id)?;
        let runner_name = step.runner.clone();
        let runner = self.runners.get(&runner_name)?;
        let default_model = runner.model().to_string();

        let inputs = resolve::resolve_inputs(workflow, &step.inputs);
        let request = StepRequest {
            workflow_id: workflow.id.clone(),
            step_id: step.id.clone(),
            task: step.task.clone(),
            inputs,
            timeout: step.timeout(),
        };
        let retry_count = step.retry_count;
        let retry_delay = step.retry_delay();

        let step = workflow.step_mut(step_id)?;
        step.start();
        workflow.current_step_id = Some(step_id.to_string());

        sflog!("Step {} started ({})", step_id, runner_name);
        self.emit(SchedulerEvent::StepStarted {
            step_id: step_id.to_string(),
            runner: runner_name.clone(),
        })
        .await;

        Some(StepInvocation {
            step_id: step_id.to_string(),
            runner_name,
            default_model,
            runner,
            request,
            retry_count,
            retry_delay,
        })
    }

    /// Fail a step whose runner is not registered.
    async fn apply_missing_runner(
        &self,
        workflow: &mut WorkflowDefinition,
        step_id: &str,
        batch_failures: &mut Vec<(String, String)>,
    ) {
        let error = workflow
            .step(step_id)
            .map(|s| crate::Error::RunnerNotFound(s.runner.clone()).to_string())
            .unwrap_or_else(|| format!("Task runner not found for step: {}", step_id));
        sflog_warn!("Step {} failed: {}", step_id, error);
        if let Some(step) = workflow.step_mut(step_id) {
            step.fail(&error);
        }
        self.emit(SchedulerEvent::StepFailed {
            step_id: step_id.to_string(),
            error: error.clone(),
        })
        .await;
        batch_failures.push((step_id.to_string(), error));
    }

    /// Record an outcome on the step, the ledger, and the workflow counters.
    async fn apply_outcome(
        &mut self,
        workflow: &mut WorkflowDefinition,
        outcome: StepOutcome,
        batch_failures: &mut Vec<(String, String)>,
    ) {
        // Usage is charged for every attempt, including failed ones.
        for usage in &outcome.usages {
            let model = if usage.model.is_empty() {
                outcome.default_model.as_str()
            } else {
                usage.model.as_str()
            };
            match self.ledger.record(
                model,
                usage.input_tokens,
                usage.output_tokens,
                Some(&outcome.runner_name),
                Some(&outcome.step_id),
            ) {
                Ok(entry) => {
                    workflow.total_cost_usd += entry.cost_usd;
                    workflow.total_tokens += usage.input_tokens + usage.output_tokens;
                }
                Err(e) => sflog_warn!("Failed to record cost entry: {}", e),
            }
        }

        let succeeded = outcome.succeeded();
        let Some(step) = workflow.step_mut(&outcome.step_id) else {
            return;
        };
        step.retry_attempts = outcome.retry_attempts;

        if succeeded {
            let response = outcome.response.unwrap_or_default();
            step.result = response.output;
            step.outputs.extend(response.outputs);
            step.findings.extend(response.findings);
            if response.change_plan.is_some() {
                step.change_plan = response.change_plan;
            }
            if response.eval_result.is_some() {
                step.eval_result = response.eval_result;
            }
            step.complete();
            sflog!("Step {} completed", outcome.step_id);
            self.emit(SchedulerEvent::StepCompleted {
                step_id: outcome.step_id,
            })
            .await;
        } else {
            let error = outcome
                .error
                .unwrap_or_else(|| "Runner reported failure".to_string());
            step.fail(&error);
            sflog_warn!("Step {} failed: {}", outcome.step_id, error);
            self.emit(SchedulerEvent::StepFailed {
                step_id: outcome.step_id.clone(),
                error: error.clone(),
            })
            .await;
            batch_failures.push((outcome.step_id, error));
        }
    }

    /// Aggregate per-step outputs into the execution result.
    async fn finalize(
        &self,
        workflow: &mut WorkflowDefinition,
        elapsed: Duration,
    ) -> WorkflowExecutionResult {
        if workflow.status != WorkflowStatus::Completed {
            // Steps never dispatched are marked Skipped so the workflow is
            // fully terminal and immutable.
            for step in workflow.steps.iter_mut() {
                if step.status == StepStatus::Pending {
                    step.skip();
                }
            }
        }

        let mut findings = Vec::new();
        let mut change_plans = Vec::new();
        let mut eval_results = Vec::new();
        let mut failed_steps = 0;
        for step in &workflow.steps {
            findings.extend(step.findings.iter().cloned());
            if let Some(plan) = &step.change_plan {
                change_plans.push(plan.clone());
            }
            if let Some(eval) = &step.eval_result {
                eval_results.push(eval.clone());
            }
            if step.status == StepStatus::Failed {
                failed_steps += 1;
            }
        }

        let success = workflow.status == WorkflowStatus::Completed && failed_steps == 0;
        let status = workflow.status;
        sflog!(
            "Workflow {} finished: {} ({}/{} steps completed, ${:.4})",
            workflow.id,
            status,
            workflow.completed_steps(),
            workflow.step_count(),
            workflow.total_cost_usd
        );
        self.emit(SchedulerEvent::WorkflowFinished {
            workflow_id: workflow.id.clone(),
            status,
        })
        .await;

        WorkflowExecutionResult {
            workflow_id: workflow.id.clone(),
            success,
            status,
            steps_completed: workflow.completed_steps(),
            total_steps: workflow.step_count(),
            findings,
            change_plans,
            eval_results,
            total_cost_usd: workflow.total_cost_usd,
            total_tokens: workflow.total_tokens,
            duration_secs: elapsed.as_secs_f64(),
            error: workflow.error_message.clone(),
            failed_step_id: workflow.failed_step_id.clone(),
        }
    }
}

/// Run one step invocation with timeout and retry policy.
///
/// Each attempt is bounded by the step's timeout; failed attempts wait the
/// configured retry delay before the next. Usage is collected from every
/// attempt that produced a response.
async fn run_invocation(invocation: StepInvocation) -> StepOutcome {
    let max_attempts = invocation.retry_count + 1;
    let mut usages = Vec::new();
    let mut last_error = String::new();

    for attempt in 0..max_attempts {
        let result = tokio::time::timeout(
            invocation.request.timeout,
            invocation.runner.execute(invocation.request.clone()),
        )
        .await;

        match result {
            Err(_) => {
                last_error = format!(
                    "Step timed out after {}s",
                    invocation.request.timeout.as_secs()
                );
            }
            Ok(Err(e)) => {
                last_error = e.to_string();
            }
            Ok(Ok(response)) => {
                usages.push(response.usage.clone());
                if response.success {
                    return StepOutcome {
                        step_id: invocation.step_id,
                        runner_name: invocation.runner_name,
                        default_model: invocation.default_model,
                        response: Some(response),
                        error: None,
                        retry_attempts: attempt,
                        usages,
                    };
                }
                last_error = response
                    .error
                    .clone()
                    .unwrap_or_else(|| "Runner reported failure".to_string());
            }
        }

        if attempt + 1 < max_attempts {
            sflog_debug!(
                "Step {} attempt {} failed, retrying in {:?}: {}",
                invocation.step_id,
                attempt + 1,
                invocation.retry_delay,
                last_error
            );
            tokio::time::sleep(invocation.retry_delay).await;
        }
    }

    StepOutcome {
        step_id: invocation.step_id,
        runner_name: invocation.runner_name,
        default_model: invocation.default_model,
        response: None,
        error: Some(last_error),
        retry_attempts: max_attempts - 1,
        usages,
    }
}
