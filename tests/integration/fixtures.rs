//! Test fixtures for integration tests.
//!
//! Provides a scriptable mock task runner plus helpers for wiring runner
//! registries and schedulers. The mock records dispatch order, the inputs
//! each step received after reference resolution, and the highest number of
//! steps it ever saw in flight at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use stepflow::{CostLedger, RunnerRegistry, Scheduler, StepRequest, StepResponse, TaskRunner};

/// Scripted behavior for one step id.
pub enum MockBehavior {
    /// Return this response as-is.
    Respond(StepResponse),
    /// Fail `remaining` times with a transient error, then return `then`.
    FailTimes { remaining: u32, then: StepResponse },
    /// Sleep far past any reasonable step timeout.
    Hang(Duration),
}

/// A scriptable task runner.
///
/// Unscripted steps succeed with a generic payload. Script per-step
/// behavior with `on` before wrapping in an Arc and registering.
pub struct MockRunner {
    model: String,
    delay: Duration,
    usage: Option<(String, u64, u64)>,
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Mutex<Vec<String>>,
    inputs_seen: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self {
            model: "claude-sonnet-4".to_string(),
            delay: Duration::ZERO,
            usage: None,
            behaviors: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            inputs_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep this long inside every execution (builder style).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Attach this usage to every unscripted response (builder style).
    pub fn with_usage(mut self, model: &str, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some((model.to_string(), input_tokens, output_tokens));
        self
    }

    /// Script the behavior for one step id (builder style).
    pub fn on(self, step_id: &str, behavior: MockBehavior) -> Self {
        self.behaviors
            .lock()
            .unwrap()
            .insert(step_id.to_string(), behavior);
        self
    }

    /// Highest number of steps observed in flight simultaneously.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Step ids in the order execution started.
    pub fn started_order(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// The resolved inputs a step received, if it was dispatched.
    pub fn inputs_for(&self, step_id: &str) -> Option<HashMap<String, Value>> {
        self.inputs_seen.lock().unwrap().get(step_id).cloned()
    }
}

enum Action {
    Respond(StepResponse),
    Hang(Duration),
}

#[async_trait]
impl TaskRunner for MockRunner {
    fn model(&self) -> &str {
        &self.model
    }

    async fn execute(&self, request: StepRequest) -> stepflow::Result<StepResponse> {
        self.started.lock().unwrap().push(request.step_id.clone());
        self.inputs_seen
            .lock()
            .unwrap()
            .insert(request.step_id.clone(), request.inputs.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let action = {
            let mut behaviors = self.behaviors.lock().unwrap();
            match behaviors.get_mut(&request.step_id) {
                None => Action::Respond(StepResponse::ok(json!({
                    "step": request.step_id,
                    "task": request.task,
                }))),
                Some(MockBehavior::Respond(response)) => Action::Respond(response.clone()),
                Some(MockBehavior::FailTimes { remaining, then }) => {
                    if *remaining > 0 {
                        *remaining -= 1;
                        Action::Respond(StepResponse::failed("transient failure"))
                    } else {
                        Action::Respond(then.clone())
                    }
                }
                Some(MockBehavior::Hang(duration)) => Action::Hang(*duration),
            }
        };

        let mut response = match action {
            Action::Respond(response) => response,
            Action::Hang(duration) => {
                // The scheduler's per-step timeout fires long before this.
                tokio::time::sleep(duration).await;
                StepResponse::ok(json!("too late"))
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if response.usage.input_tokens == 0 && response.usage.output_tokens == 0 {
            if let Some((model, input, output)) = &self.usage {
                response = response.with_usage(model, *input, *output);
            }
        }
        Ok(response)
    }
}

/// Register the same runner under each of the given names.
pub fn registry(names: &[&str], runner: &Arc<MockRunner>) -> RunnerRegistry {
    let mut registry = RunnerRegistry::new();
    for name in names {
        let runner: Arc<dyn TaskRunner> = runner.clone();
        registry.register(name, runner);
    }
    registry
}

/// A scheduler with the runner registered as `worker` and a $10 budget.
pub fn scheduler(runner: &Arc<MockRunner>) -> Scheduler {
    Scheduler::new(registry(&["worker"], runner), CostLedger::new(10.0))
}
