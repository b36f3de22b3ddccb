//! Workflow orchestrator implementation.
//!
//! Handles readiness scheduling, per-step retry and timeout policy,
//! upstream-failure skipping, and cancellation. All bookkeeping for a run
//! (in-degree counters, ready set, dependency outputs) is owned by the
//! driver loop; dispatched step tasks never touch shared state.

use std::any::Any;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use trellis_workflow::{Graph, RetryBackoff, StepContext, WorkflowDefinition, WorkflowStep};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::execution::{ExecutionStatus, StepOutcome, StepRecord, WorkflowExecution};
use crate::options::OrchestratorOptions;

/// Executes workflow definitions and retains their reports.
///
/// One orchestrator may drive any number of executions, of the same or of
/// different definitions, without cross-run interference.
#[derive(Debug, Default)]
pub struct Orchestrator {
  options: OrchestratorOptions,
  executions: DashMap<Uuid, WorkflowExecution>,
}

impl Orchestrator {
  /// Create an orchestrator with the given options.
  pub fn new(options: OrchestratorOptions) -> Self {
    Self {
      options,
      executions: DashMap::new(),
    }
  }

  /// Execute a definition to completion and return its report.
  ///
  /// Step-level failures never surface here; they are recorded per step in
  /// the returned [`WorkflowExecution`]. The error path is reserved for
  /// contract violations, such as passing a cancellation token that is
  /// already cancelled.
  #[instrument(
    name = "workflow_execute",
    skip(self, definition, cancel),
    fields(workflow = %definition.name())
  )]
  pub async fn execute(
    &self,
    definition: &WorkflowDefinition,
    cancel: CancellationToken,
  ) -> Result<WorkflowExecution, OrchestratorError> {
    if cancel.is_cancelled() {
      return Err(OrchestratorError::InvalidExecutionState {
        message: "cancellation token is already cancelled".to_string(),
      });
    }

    let mut execution = WorkflowExecution::new(definition.name());
    execution.start()?;
    info!(
      execution_id = %execution.execution_id(),
      steps = definition.len(),
      "workflow_started"
    );

    let status = {
      let mut run = Run::new(definition, &self.options, &cancel, &mut execution);
      if self.options.concurrent {
        run.drive_concurrent().await?
      } else {
        run.drive_sequential().await?
      }
    };
    execution.finalize(status)?;

    match status {
      ExecutionStatus::Completed => {
        info!(execution_id = %execution.execution_id(), "workflow_completed");
      }
      ExecutionStatus::Cancelled => {
        warn!(execution_id = %execution.execution_id(), "workflow_cancelled");
      }
      _ => {
        error!(execution_id = %execution.execution_id(), "workflow_failed");
      }
    }

    self
      .executions
      .insert(execution.execution_id(), execution.clone());
    Ok(execution)
  }

  /// Report of a previous run, if this orchestrator executed it.
  pub fn execution(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
    self
      .executions
      .get(&execution_id)
      .map(|e| e.value().clone())
  }

  /// Reports of every run this orchestrator has finished.
  pub fn executions(&self) -> Vec<WorkflowExecution> {
    self.executions.iter().map(|e| e.value().clone()).collect()
  }
}

/// Bookkeeping for one run.
///
/// Owned by the driver loop, which is the single writer; step tasks only
/// receive owned copies of their step and context.
struct Run<'a> {
  definition: &'a WorkflowDefinition,
  options: &'a OrchestratorOptions,
  cancel: &'a CancellationToken,
  execution: &'a mut WorkflowExecution,
  graph: Graph,
  /// Step name -> declaration index.
  index_of: HashMap<String, usize>,
  /// Declaration index -> count of dependencies without a recorded success.
  indegree: Vec<usize>,
  /// Ready steps, keyed by declaration index for deterministic selection.
  ready: BTreeSet<usize>,
  /// Steps with a terminal record.
  settled: Vec<bool>,
  /// Successful outputs, keyed by step name.
  outputs: HashMap<String, Value>,
  any_failed: bool,
}

impl<'a> Run<'a> {
  fn new(
    definition: &'a WorkflowDefinition,
    options: &'a OrchestratorOptions,
    cancel: &'a CancellationToken,
    execution: &'a mut WorkflowExecution,
  ) -> Self {
    let steps = definition.steps();
    let index_of = steps
      .iter()
      .enumerate()
      .map(|(i, s)| (s.name.clone(), i))
      .collect();
    let indegree: Vec<usize> = steps.iter().map(|s| s.dependencies.len()).collect();
    let ready = indegree
      .iter()
      .enumerate()
      .filter(|(_, degree)| **degree == 0)
      .map(|(i, _)| i)
      .collect();

    Self {
      definition,
      options,
      cancel,
      execution,
      graph: definition.graph(),
      index_of,
      indegree,
      ready,
      settled: vec![false; steps.len()],
      outputs: HashMap::new(),
      any_failed: false,
    }
  }

  /// Execute ready steps one at a time, ascending by declaration index.
  async fn drive_sequential(&mut self) -> Result<ExecutionStatus, OrchestratorError> {
    loop {
      if self.cancel.is_cancelled() {
        self.mark_unstarted_cancelled()?;
        return Ok(ExecutionStatus::Cancelled);
      }
      let Some(idx) = self.ready.pop_first() else {
        break;
      };

      let step = self.definition.steps()[idx].clone();
      let ctx = self.context_for(&step);
      let record = run_step(step, ctx, self.options.default_retry_backoff).await;
      self.settle_executed(idx, record)?;

      if self.options.fail_fast && self.any_failed {
        self.mark_unstarted_cancelled()?;
        return Ok(ExecutionStatus::Failed);
      }
    }

    Ok(self.natural_status())
  }

  /// Dispatch every ready step together; completion order drives readiness.
  async fn drive_concurrent(&mut self) -> Result<ExecutionStatus, OrchestratorError> {
    let mut tasks: JoinSet<(usize, StepRecord)> = JoinSet::new();
    let mut cancelled = false;

    loop {
      let halted = cancelled || (self.options.fail_fast && self.any_failed);
      if !halted {
        self.dispatch_ready(&mut tasks);
      }
      if tasks.is_empty() {
        break;
      }

      tokio::select! {
        joined = tasks.join_next() => {
          match joined {
            Some(Ok((idx, record))) => self.settle_executed(idx, record)?,
            Some(Err(join_error)) => {
              return Err(OrchestratorError::WorkerFailure {
                message: join_error.to_string(),
              });
            }
            None => break,
          }
        }
        _ = self.cancel.cancelled(), if !cancelled => {
          // Stop dispatching; in-flight steps are allowed to finish.
          warn!("workflow_cancel_requested");
          cancelled = true;
        }
      }
    }

    if cancelled {
      self.mark_unstarted_cancelled()?;
      return Ok(ExecutionStatus::Cancelled);
    }
    if self.options.fail_fast && self.any_failed {
      self.mark_unstarted_cancelled()?;
    }
    Ok(self.natural_status())
  }

  fn natural_status(&self) -> ExecutionStatus {
    if self.any_failed {
      ExecutionStatus::Failed
    } else {
      ExecutionStatus::Completed
    }
  }

  /// Spawn every currently ready step onto the join set.
  fn dispatch_ready(&mut self, tasks: &mut JoinSet<(usize, StepRecord)>) {
    while let Some(idx) = self.ready.pop_first() {
      let step = self.definition.steps()[idx].clone();
      let ctx = self.context_for(&step);
      let default_backoff = self.options.default_retry_backoff;
      tasks.spawn(async move {
        let record = run_step(step, ctx, default_backoff).await;
        (idx, record)
      });
    }
  }

  /// Context for a step: the successful outputs of its declared
  /// dependencies, never of unrelated steps.
  fn context_for(&self, step: &WorkflowStep) -> StepContext {
    let outputs = step
      .dependencies
      .iter()
      .filter_map(|dep| self.outputs.get(dep).map(|v| (dep.clone(), v.clone())))
      .collect();
    StepContext::new(outputs, self.cancel.child_token())
  }

  /// Apply an executed step's record to the bookkeeping.
  fn settle_executed(&mut self, idx: usize, record: StepRecord) -> Result<(), OrchestratorError> {
    let name = self.definition.steps()[idx].name.clone();
    self.settled[idx] = true;
    let succeeded = record.outcome.is_success();

    if let StepOutcome::Succeeded { output } = &record.outcome {
      self.outputs.insert(name.clone(), output.clone());
      let dependents: Vec<usize> = self
        .graph
        .downstream(&name)
        .iter()
        .map(|d| self.index_of[d])
        .collect();
      for di in dependents {
        self.indegree[di] -= 1;
        if self.indegree[di] == 0 && !self.settled[di] {
          self.ready.insert(di);
        }
      }
    }

    self.execution.record_step(&name, record)?;

    if !succeeded {
      self.any_failed = true;
      self.skip_descendants(idx)?;
    }
    Ok(())
  }

  /// Mark every transitive dependent of a permanently failed step as
  /// skipped. Skipped steps are terminal and their work is never invoked.
  fn skip_descendants(&mut self, failed: usize) -> Result<(), OrchestratorError> {
    let mut queue = VecDeque::from([failed]);
    while let Some(idx) = queue.pop_front() {
      let name = self.definition.steps()[idx].name.clone();
      let dependents: Vec<usize> = self
        .graph
        .downstream(&name)
        .iter()
        .map(|d| self.index_of[d])
        .collect();
      for di in dependents {
        if self.settled[di] {
          continue;
        }
        self.settled[di] = true;
        let dependent = &self.definition.steps()[di].name;
        info!(step = %dependent, failed_dependency = %name, "step_skipped");
        self.execution.record_step(
          dependent,
          StepRecord::not_run(StepOutcome::UpstreamFailed {
            dependency: name.clone(),
          }),
        )?;
        queue.push_back(di);
      }
    }
    Ok(())
  }

  /// Record a cancelled outcome for every step that never started.
  fn mark_unstarted_cancelled(&mut self) -> Result<(), OrchestratorError> {
    self.ready.clear();
    for idx in 0..self.settled.len() {
      if self.settled[idx] {
        continue;
      }
      self.settled[idx] = true;
      self.execution.record_step(
        &self.definition.steps()[idx].name,
        StepRecord::not_run(StepOutcome::Cancelled),
      )?;
    }
    Ok(())
  }
}

/// Result of a single invocation of a step's work function.
enum Attempt {
  Succeeded(Value),
  Failed(String),
  TimedOut(Duration),
}

/// Run one step to a terminal outcome, applying timeout and retry policy.
///
/// The work function is invoked at most `1 + max_retries` times. A panic in
/// the work function is contained and counts as a failed attempt, so both
/// scheduling modes report it identically.
#[instrument(name = "step_execute", skip(step, ctx, default_backoff), fields(step = %step.name))]
async fn run_step(
  step: WorkflowStep,
  ctx: StepContext,
  default_backoff: Option<RetryBackoff>,
) -> StepRecord {
  let started_at = Utc::now();
  let backoff = step.retry_backoff.or(default_backoff);
  let mut attempts = 0u32;

  let outcome = loop {
    attempts += 1;
    info!(attempt = attempts, "step_started");

    let work = AssertUnwindSafe(step.work.invoke(ctx.clone())).catch_unwind();
    let attempt = match step.timeout {
      Some(limit) => match tokio::time::timeout(limit, work).await {
        Ok(finished) => flatten_attempt(finished),
        Err(_) => Attempt::TimedOut(limit),
      },
      None => flatten_attempt(work.await),
    };

    match attempt {
      Attempt::Succeeded(output) => {
        info!(attempts, "step_completed");
        break StepOutcome::Succeeded { output };
      }
      Attempt::Failed(error) => {
        if attempts <= step.max_retries {
          warn!(attempt = attempts, error = %error, "step_retry");
          wait_before_retry(backoff, attempts).await;
        } else {
          error!(attempts, error = %error, "step_failed");
          break StepOutcome::Failed { error };
        }
      }
      Attempt::TimedOut(limit) => {
        let timeout_ms = limit.as_millis() as u64;
        if attempts <= step.max_retries {
          warn!(attempt = attempts, timeout_ms, "step_retry");
          wait_before_retry(backoff, attempts).await;
        } else {
          error!(attempts, timeout_ms, "step_timed_out");
          break StepOutcome::TimedOut { timeout_ms };
        }
      }
    }
  };

  StepRecord {
    outcome,
    attempts,
    started_at: Some(started_at),
    finished_at: Some(Utc::now()),
  }
}

async fn wait_before_retry(backoff: Option<RetryBackoff>, failed_attempts: u32) {
  if let Some(backoff) = backoff {
    tokio::time::sleep(backoff.delay_for(failed_attempts)).await;
  }
}

fn flatten_attempt(
  finished: Result<Result<Value, anyhow::Error>, Box<dyn Any + Send>>,
) -> Attempt {
  match finished {
    Ok(Ok(output)) => Attempt::Succeeded(output),
    Ok(Err(error)) => Attempt::Failed(format!("{error:#}")),
    Err(panic) => Attempt::Failed(panic_message(&*panic)),
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  let detail = panic
    .downcast_ref::<&str>()
    .map(|s| (*s).to_string())
    .or_else(|| panic.downcast_ref::<String>().cloned())
    .unwrap_or_else(|| "non-string panic payload".to_string());
  format!("step work panicked: {detail}")
}
