//! Trellis Workflow
//!
//! This crate provides the declarative workflow representation for Trellis.
//! A workflow is a named set of steps, each an opaque unit of async work
//! with declared dependencies and a retry budget.
//!
//! Definitions are built through [`WorkflowBuilder`], which validates name
//! uniqueness, dependency existence, and acyclicity. An invalid definition
//! never reaches the orchestrator:
//! - Name collisions fail the offending `add_step` call immediately
//! - Graph checks run once in `build()`
//! - A successful `build()` freezes the builder and returns an immutable
//!   [`WorkflowDefinition`], reusable across any number of executions

mod builder;
mod error;
mod graph;
mod step;
mod workflow;

pub use builder::WorkflowBuilder;
pub use error::DefinitionError;
pub use graph::Graph;
pub use step::{RetryBackoff, StepContext, StepWork, WorkFuture, WorkflowStep};
pub use workflow::WorkflowDefinition;
