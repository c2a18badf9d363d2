//! stepflow: a dependency-aware workflow scheduling engine.
//!
//! A workflow is a set of steps with dependency edges, executed by pluggable
//! task runners. The scheduler repeatedly dispatches every step whose
//! dependencies are satisfied, fanning out parallel groups concurrently,
//! resolving `$source.key` input references against earlier outputs, and
//! charging token usage against a budgeted cost ledger.
//!
//! ```no_run
//! use stepflow::{
//!     CostLedger, RunnerRegistry, Scheduler, Step, WorkflowDefinition,
//! };
//!
//! # async fn run(registry: RunnerRegistry) -> stepflow::Result<()> {
//! let mut workflow = WorkflowDefinition::new(
//!     "audit",
//!     vec![
//!         Step::new("analyze", "backend_analyzer", "Analyze the codebase"),
//!         Step::new("fix", "debugger", "Fix what was found")
//!             .depends_on(&["analyze"])
//!             .with_input("findings", serde_json::json!("$analyze.findings")),
//!     ],
//! );
//! workflow.validate()?;
//!
//! let mut scheduler = Scheduler::new(registry, CostLedger::new(10.0));
//! let result = scheduler.execute_with_timeout(&mut workflow).await;
//! println!("{}: {}", result.workflow_id, result.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod cost;
pub mod decompose;
pub mod error;
pub mod log;
pub mod resolve;
pub mod runner;
pub mod scheduler;

pub use config::Config;
pub use crate::core::step::{Step, StepStatus};
pub use crate::core::workflow::{WorkflowDefinition, WorkflowStatus};
pub use cost::{BudgetAlert, CostEntry, CostLedger, CostSummary};
pub use decompose::{GoalDecomposer, KeywordDecomposer};
pub use error::{Error, Result};
pub use runner::{RunnerRegistry, StepRequest, StepResponse, TaskRunner};
pub use scheduler::{Scheduler, SchedulerEvent, WorkflowExecutionResult};
