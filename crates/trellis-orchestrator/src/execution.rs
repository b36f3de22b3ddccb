//! Execution reports.
//!
//! A [`WorkflowExecution`] is created when a run starts, mutated exclusively
//! by the orchestrator as steps reach terminal outcomes, and finalized
//! exactly once. After that it is a read-only report of what ran, what was
//! retried, and what was skipped.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::OrchestratorError;

/// Overall status of one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Pending,
  InProgress,
  Completed,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  /// Whether the run has reached a final state.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
  }
}

/// Terminal outcome of a single step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
  /// The work function returned a value.
  Succeeded { output: Value },
  /// The work function failed on its final attempt.
  Failed { error: String },
  /// The final attempt exceeded the step's timeout.
  TimedOut { timeout_ms: u64 },
  /// A dependency chain failed; the work function was never invoked.
  UpstreamFailed { dependency: String },
  /// The run was cancelled or halted before the step started.
  Cancelled,
}

impl StepOutcome {
  /// Whether the step produced a successful output.
  pub fn is_success(&self) -> bool {
    matches!(self, Self::Succeeded { .. })
  }
}

/// Everything recorded about one step within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
  pub outcome: StepOutcome,
  /// Number of times the work function was invoked.
  pub attempts: u32,
  pub started_at: Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
}

impl StepRecord {
  /// Record for a step whose work was never invoked.
  pub(crate) fn not_run(outcome: StepOutcome) -> Self {
    Self {
      outcome,
      attempts: 0,
      started_at: None,
      finished_at: None,
    }
  }
}

/// Report of one workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowExecution {
  execution_id: Uuid,
  workflow_name: String,
  status: ExecutionStatus,
  step_records: HashMap<String, StepRecord>,
  started_at: DateTime<Utc>,
  finished_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
  pub(crate) fn new(workflow_name: &str) -> Self {
    Self {
      execution_id: Uuid::new_v4(),
      workflow_name: workflow_name.to_string(),
      status: ExecutionStatus::Pending,
      step_records: HashMap::new(),
      started_at: Utc::now(),
      finished_at: None,
    }
  }

  pub(crate) fn start(&mut self) -> Result<(), OrchestratorError> {
    if self.status != ExecutionStatus::Pending {
      return Err(OrchestratorError::InvalidExecutionState {
        message: format!("cannot start a run in state {:?}", self.status),
      });
    }
    self.status = ExecutionStatus::InProgress;
    Ok(())
  }

  pub(crate) fn record_step(
    &mut self,
    step: &str,
    record: StepRecord,
  ) -> Result<(), OrchestratorError> {
    if self.status.is_terminal() {
      return Err(OrchestratorError::InvalidExecutionState {
        message: format!("cannot record step '{step}' after the run is finalized"),
      });
    }
    self.step_records.insert(step.to_string(), record);
    Ok(())
  }

  pub(crate) fn finalize(&mut self, status: ExecutionStatus) -> Result<(), OrchestratorError> {
    if self.status.is_terminal() {
      return Err(OrchestratorError::InvalidExecutionState {
        message: format!("run already finalized as {:?}", self.status),
      });
    }
    if !status.is_terminal() {
      return Err(OrchestratorError::InvalidExecutionState {
        message: format!("{status:?} is not a terminal status"),
      });
    }
    self.status = status;
    self.finished_at = Some(Utc::now());
    Ok(())
  }

  /// Unique id for this run.
  pub fn execution_id(&self) -> Uuid {
    self.execution_id
  }

  /// Name of the workflow that ran.
  pub fn workflow_name(&self) -> &str {
    &self.workflow_name
  }

  /// Overall status.
  pub fn status(&self) -> ExecutionStatus {
    self.status
  }

  /// Per-step records, keyed by step name.
  pub fn step_records(&self) -> &HashMap<String, StepRecord> {
    &self.step_records
  }

  /// Record for one step.
  pub fn step_record(&self, step: &str) -> Option<&StepRecord> {
    self.step_records.get(step)
  }

  /// Successful output of a step, if it succeeded.
  pub fn output(&self, step: &str) -> Option<&Value> {
    match &self.step_record(step)?.outcome {
      StepOutcome::Succeeded { output } => Some(output),
      _ => None,
    }
  }

  /// When the run started.
  pub fn started_at(&self) -> DateTime<Utc> {
    self.started_at
  }

  /// When the run reached a terminal status.
  pub fn finished_at(&self) -> Option<DateTime<Utc>> {
    self.finished_at
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lifecycle_transitions_are_guarded() {
    let mut execution = WorkflowExecution::new("w");
    assert_eq!(execution.status(), ExecutionStatus::Pending);

    execution.start().unwrap();
    assert_eq!(execution.status(), ExecutionStatus::InProgress);
    assert!(execution.start().is_err());

    execution.finalize(ExecutionStatus::Completed).unwrap();
    assert!(execution.finished_at().is_some());
    assert!(execution.finalize(ExecutionStatus::Failed).is_err());
    assert!(
      execution
        .record_step("a", StepRecord::not_run(StepOutcome::Cancelled))
        .is_err()
    );
  }

  #[test]
  fn finalize_rejects_non_terminal_status() {
    let mut execution = WorkflowExecution::new("w");
    execution.start().unwrap();
    assert!(execution.finalize(ExecutionStatus::InProgress).is_err());
  }
}
