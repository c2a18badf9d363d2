//! Goal decomposition into workflow steps.
//!
//! Decomposers turn a free-text goal into a step graph. The built-in
//! `KeywordDecomposer` classifies the goal by keyword groups and assembles
//! an analysis/action/verification/documentation pipeline; anything smarter
//! (an LLM planner, a template library) can plug in behind the trait.

use crate::core::step::Step;
use crate::core::workflow::WorkflowDefinition;
use crate::sflog;
use serde_json::json;

/// Strategy for turning a goal into a step graph.
pub trait GoalDecomposer {
    /// Produce the steps that achieve the goal. The returned graph must
    /// pass `WorkflowDefinition::validate`.
    fn decompose(&self, goal: &str) -> Vec<Step>;

    /// Build a ready-to-execute workflow for the goal, with the goal
    /// seeded into the workflow's global inputs.
    fn plan_workflow(&self, goal: &str) -> WorkflowDefinition {
        let steps = self.decompose(goal);
        sflog!("Planned workflow for goal with {} steps", steps.len());
        let name = match goal.char_indices().nth(50) {
            Some((idx, _)) => format!("Workflow: {}...", &goal[..idx]),
            None => format!("Workflow: {}", goal),
        };
        let mut workflow = WorkflowDefinition::new(&name, steps).with_input("goal", json!(goal));
        workflow.description = Some(format!("Auto-generated workflow to achieve: {}", goal));
        workflow
    }
}

/// Keyword groups and the analysis runner each one selects.
const ANALYSIS_RUNNERS: &[(&[&str], &str, &str, &str)] = &[
    (
        &["security", "vulnerab", "safe", "secure", "owasp"],
        "security_analyzer",
        "analyze_security",
        "Security",
    ),
    (
        &["api", "endpoint", "rest", "graphql", "swagger", "openapi"],
        "api_architect",
        "analyze_api",
        "API design/review",
    ),
    (
        &["database", "schema", "sql", "migration", "query"],
        "database_architect",
        "analyze_database",
        "Database",
    ),
    (
        &["frontend", "ui", "component", "react", "css", "accessibility"],
        "frontend_analyzer",
        "analyze_frontend",
        "Frontend",
    ),
    (
        &["rag", "embedding", "vector", "llm", "agent", "prompt", "ai"],
        "rag_architect",
        "analyze_ai",
        "AI/RAG",
    ),
];

const ANALYSIS_WORDS: &[&str] = &["analyze", "review", "check", "audit", "assess", "evaluate"];
const FIX_WORDS: &[&str] = &["fix", "debug", "repair", "bug", "error", "issue"];
const IMPROVE_WORDS: &[&str] = &["improve", "refactor", "optimize", "clean", "enhance"];
const TEST_WORDS: &[&str] = &["test", "coverage", "verify", "validate"];
const DOCS_WORDS: &[&str] = &["document", "readme", "comment", "docstring"];

fn matches_any(goal: &str, words: &[&str]) -> bool {
    words.iter().any(|w| goal.contains(w))
}

/// Decomposer that classifies the goal by keywords.
///
/// Analysis steps share the `analysis` parallel group; action steps depend
/// on the full analysis phase; a verification step follows the actions and
/// a documentation step depends on everything before it. A goal matching
/// nothing gets a single general analysis step.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordDecomposer;

impl KeywordDecomposer {
    pub fn new() -> Self {
        Self
    }
}

impl GoalDecomposer for KeywordDecomposer {
    fn decompose(&self, goal: &str) -> Vec<Step> {
        let lower = goal.to_lowercase();
        let needs_fix = matches_any(&lower, FIX_WORDS);
        let needs_improve = matches_any(&lower, IMPROVE_WORDS);
        let needs_test = matches_any(&lower, TEST_WORDS);
        let needs_docs = matches_any(&lower, DOCS_WORDS);

        let mut steps: Vec<Step> = Vec::new();
        let mut step_id = 0usize;

        // Phase 1: analysis, fanned out as one parallel group. A general
        // analysis step is always present unless the goal is purely an
        // action goal.
        let wants_general =
            matches_any(&lower, ANALYSIS_WORDS)
                || !(needs_fix || needs_improve || needs_test || needs_docs);
        if wants_general {
            step_id += 1;
            steps.push(
                Step::new(
                    &format!("analyze_backend_{}", step_id),
                    "backend_analyzer",
                    &format!("Analyze the codebase for: {}", goal),
                )
                .in_group("analysis"),
            );
        }
        for (words, runner, id_prefix, label) in ANALYSIS_RUNNERS {
            if matches_any(&lower, words) {
                step_id += 1;
                steps.push(
                    Step::new(
                        &format!("{}_{}", id_prefix, step_id),
                        runner,
                        &format!("{} analysis for: {}", label, goal),
                    )
                    .in_group("analysis"),
                );
            }
        }
        let analysis_ids: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();
        let analysis_refs: Vec<&str> = analysis_ids.iter().map(|s| s.as_str()).collect();

        // Phase 2: action steps, gated on the whole analysis phase. Each
        // analysis step's findings are fed in as a resolvable reference.
        if needs_fix {
            step_id += 1;
            let mut fix = Step::new(
                &format!("fix_{}", step_id),
                "debugger",
                &format!("Fix issues identified: {}", goal),
            )
            .depends_on(&analysis_refs);
            for id in &analysis_ids {
                fix = fix.with_input(
                    &format!("{}_findings", id),
                    json!(format!("${}.findings", id)),
                );
            }
            steps.push(fix);
        }
        if needs_improve {
            step_id += 1;
            let mut improve = Step::new(
                &format!("improve_{}", step_id),
                "improver",
                &format!("Improve code: {}", goal),
            )
            .depends_on(&analysis_refs);
            for id in &analysis_ids {
                improve = improve.with_input(
                    &format!("{}_findings", id),
                    json!(format!("${}.findings", id)),
                );
            }
            steps.push(improve);
        }

        // Phase 3: verification follows the actions when any exist,
        // otherwise the analysis phase.
        if needs_test || needs_fix || needs_improve {
            let action_ids: Vec<String> = steps
                .iter()
                .filter(|s| s.id.starts_with("fix_") || s.id.starts_with("improve_"))
                .map(|s| s.id.clone())
                .collect();
            let deps: Vec<&str> = if action_ids.is_empty() {
                analysis_refs.clone()
            } else {
                action_ids.iter().map(|s| s.as_str()).collect()
            };
            step_id += 1;
            steps.push(
                Step::new(
                    &format!("test_{}", step_id),
                    "tester",
                    &format!("Create and run tests for: {}", goal),
                )
                .depends_on(&deps),
            );
        }

        // Phase 4: documentation depends on everything before it.
        if needs_docs {
            let prior_ids: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();
            let prior_refs: Vec<&str> = prior_ids.iter().map(|s| s.as_str()).collect();
            step_id += 1;
            steps.push(
                Step::new(
                    &format!("document_{}", step_id),
                    "documenter",
                    &format!("Update documentation for: {}", goal),
                )
                .depends_on(&prior_refs),
            );
        }

        // Fallback: analyze then improve.
        if steps.is_empty() {
            steps = vec![
                Step::new(
                    "analyze_1",
                    "backend_analyzer",
                    &format!("Analyze the codebase for: {}", goal),
                ),
                Step::new(
                    "improve_2",
                    "improver",
                    &format!("Implement improvements: {}", goal),
                )
                .depends_on(&["analyze_1"]),
            ];
        }

        steps
    }
}
