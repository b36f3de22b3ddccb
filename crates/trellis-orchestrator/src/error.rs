//! Error types for workflow orchestration.

use thiserror::Error;

/// Structural errors surfaced by the orchestrator's API.
///
/// Step-level failures never appear here; they are recorded per step in the
/// execution report. Only programming-contract violations escape as errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
  /// An execution was driven or mutated in a state that forbids it.
  #[error("invalid execution state: {message}")]
  InvalidExecutionState { message: String },

  /// A dispatched step task could not be joined.
  #[error("step task could not be joined: {message}")]
  WorkerFailure { message: String },
}
