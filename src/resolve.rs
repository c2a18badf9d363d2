//! Reference resolution for step inputs.
//!
//! Input values may be `$source.key` placeholder strings resolved against
//! the workflow's global inputs (`$workflow.<key>`) or a prior step's
//! outputs (`$<step_id>.<key>`). Resolution happens just before a step is
//! dispatched, so a step only ever sees outputs of steps that already
//! completed.

use crate::core::workflow::WorkflowDefinition;
use serde_json::Value;

/// Resolve a single input value against the workflow.
///
/// Non-string values and strings that do not begin with `$` pass through
/// unchanged. `$workflow.<key>` looks up the workflow's global inputs
/// (missing key resolves to `Null`). Any other source is treated as a step
/// id; `result`, `findings`, `change_plan`, and `eval_result` address the
/// step's well-known output slots, anything else falls back to the step's
/// generic `outputs` map.
///
/// Malformed references (fewer than two dot-separated parts) and references
/// to nonexistent steps return the original string unchanged. `validate`
/// is the place that rejects bad graphs up front; at dispatch time the
/// resolver stays tolerant.
pub fn resolve(workflow: &WorkflowDefinition, value: &Value) -> Value {
    let reference = match value.as_str() {
        Some(s) if s.starts_with('$') => &s[1..],
        _ => return value.clone(),
    };

    let (source, key) = match reference.split_once('.') {
        Some((source, key)) if !source.is_empty() && !key.is_empty() => (source, key),
        _ => return value.clone(),
    };
    // Nested keys are not addressable; only the first segment is used.
    let key = key.split('.').next().unwrap_or(key);

    if source == "workflow" {
        return workflow.inputs.get(key).cloned().unwrap_or(Value::Null);
    }

    let step = match workflow.step(source) {
        Some(step) => step,
        None => return value.clone(),
    };

    match key {
        "result" => step.result.clone().unwrap_or(Value::Null),
        "findings" => Value::Array(step.findings.clone()),
        "change_plan" => step.change_plan.clone().unwrap_or(Value::Null),
        "eval_result" => step.eval_result.clone().unwrap_or(Value::Null),
        _ => step.outputs.get(key).cloned().unwrap_or(Value::Null),
    }
}

/// Resolve every input of a step, returning the map the runner receives.
pub fn resolve_inputs(
    workflow: &WorkflowDefinition,
    inputs: &std::collections::HashMap<String, Value>,
) -> std::collections::HashMap<String, Value> {
    inputs
        .iter()
        .map(|(key, value)| (key.clone(), resolve(workflow, value)))
        .collect()
}
