//! Core domain models for workflow scheduling.
//!
//! This module contains the fundamental data structures used throughout
//! the engine: steps and the workflow definition that owns them.

pub mod step;
pub mod workflow;

pub use step::{Step, StepStatus};
pub use workflow::{WorkflowDefinition, WorkflowStatus};
