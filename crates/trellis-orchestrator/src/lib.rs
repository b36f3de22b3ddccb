//! Trellis Orchestrator
//!
//! Executes [`WorkflowDefinition`]s: computes a valid execution order, runs
//! each step exactly once with bounded retries, skips the descendants of
//! permanently failed steps, and produces a [`WorkflowExecution`] report.
//!
//! Two scheduling modes are supported:
//! - Sequential: ready steps run one at a time, ascending by declaration
//!   order, so independent branches execute deterministically
//! - Concurrent: every ready step is dispatched together and completion
//!   order drives downstream readiness
//!
//! In both modes a step never starts before all of its declared dependencies
//! have a recorded successful outcome. Cancellation is cooperative and
//! scoped to one execution: in-flight steps finish, unstarted steps are
//! marked cancelled, and completed outcomes are preserved.

mod error;
mod execution;
mod options;
mod orchestrator;

pub use error::OrchestratorError;
pub use execution::{ExecutionStatus, StepOutcome, StepRecord, WorkflowExecution};
pub use options::OrchestratorOptions;
pub use orchestrator::Orchestrator;

// Re-export the definition layer so callers need a single dependency.
pub use trellis_workflow::{
  DefinitionError, RetryBackoff, StepContext, StepWork, WorkflowBuilder, WorkflowDefinition,
  WorkflowStep,
};
