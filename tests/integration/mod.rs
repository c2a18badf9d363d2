//! Integration test suite for stepflow.
//!
//! These tests exercise the scheduler against full workflows, from ready
//! computation through dispatch, reference resolution, cost accounting,
//! and terminal-state handling.
//!
//! # Test Categories
//!
//! - `workflow_e2e`: Full workflow execution and reference resolution
//! - `parallel_groups`: Parallel group batching and concurrency
//! - `budget`: Budget gate and cost accounting
//! - `failure_policy`: stop_on_failure semantics and retries
//! - `timeouts`: Step/workflow timeouts and cancellation
//!
//! All tests run against a scriptable mock runner; nothing talks to a real
//! model backend.

mod fixtures;

mod failure_policy;
mod timeouts;
