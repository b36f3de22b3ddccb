//! Workflow step types.
//!
//! A step is a named unit of work with declared dependencies. The work
//! itself is an opaque async callable: it receives a [`StepContext`] holding
//! the successful outputs of the step's declared dependencies and either
//! returns a JSON value or fails with an error value. The orchestrator never
//! inspects what the work does.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Future returned by a step's work function.
pub type WorkFuture = BoxFuture<'static, Result<Value, anyhow::Error>>;

/// An opaque, cloneable step work function.
///
/// Fixed-signature contract: context in, result or error out. There is no
/// other channel between a step and the orchestrator.
#[derive(Clone)]
pub struct StepWork(Arc<dyn Fn(StepContext) -> WorkFuture + Send + Sync>);

impl StepWork {
  /// Wrap a function that already returns a boxed future.
  pub fn new<F>(work: F) -> Self
  where
    F: Fn(StepContext) -> WorkFuture + Send + Sync + 'static,
  {
    Self(Arc::new(work))
  }

  /// Wrap an async closure.
  pub fn from_fn<F, Fut>(work: F) -> Self
  where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, anyhow::Error>> + Send + 'static,
  {
    Self(Arc::new(move |ctx| -> WorkFuture { Box::pin(work(ctx)) }))
  }

  /// Invoke the work function with the given context.
  pub fn invoke(&self, ctx: StepContext) -> WorkFuture {
    (self.0)(ctx)
  }
}

impl fmt::Debug for StepWork {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("StepWork")
  }
}

/// Inputs visible to a step's work function.
///
/// Holds the outputs of the step's declared dependencies (never of unrelated
/// steps) and the cancellation signal for the run, which long-running work
/// may honor cooperatively.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
  outputs: HashMap<String, Value>,
  cancel: CancellationToken,
}

impl StepContext {
  pub fn new(outputs: HashMap<String, Value>, cancel: CancellationToken) -> Self {
    Self { outputs, cancel }
  }

  /// Output of a declared dependency, if present.
  pub fn output(&self, step: &str) -> Option<&Value> {
    self.outputs.get(step)
  }

  /// All dependency outputs, keyed by step name.
  pub fn outputs(&self) -> &HashMap<String, Value> {
    &self.outputs
  }

  /// Cancellation signal for the run this step belongs to.
  pub fn cancellation(&self) -> &CancellationToken {
    &self.cancel
  }
}

/// Delay policy between retry attempts, expressed as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
  /// Same delay before every retry.
  Constant { delay: Duration },
  /// Delay grows linearly with the number of failed attempts.
  Linear { initial: Duration },
  /// Delay doubles after each failed attempt.
  Exponential { initial: Duration },
}

impl RetryBackoff {
  /// Delay to wait after the given failed attempt (1-based).
  pub fn delay_for(&self, attempt: u32) -> Duration {
    match self {
      Self::Constant { delay } => *delay,
      Self::Linear { initial } => initial.saturating_mul(attempt.max(1)),
      Self::Exponential { initial } => {
        let doublings = attempt.saturating_sub(1);
        initial.saturating_mul(1u32.checked_shl(doublings).unwrap_or(u32::MAX))
      }
    }
  }
}

/// One unit of work within a workflow definition.
#[derive(Clone)]
pub struct WorkflowStep {
  /// Unique name within the definition.
  pub name: String,
  /// The work to run once all dependencies have succeeded.
  pub work: StepWork,
  /// Names of steps that must succeed before this one may run.
  pub dependencies: Vec<String>,
  /// Retry attempts after the first failure.
  pub max_retries: u32,
  /// Delay policy between retry attempts.
  pub retry_backoff: Option<RetryBackoff>,
  /// Per-attempt wall-clock budget.
  pub timeout: Option<Duration>,
}

impl WorkflowStep {
  /// Create a step with no dependencies and no retries.
  pub fn new(name: impl Into<String>, work: StepWork) -> Self {
    Self {
      name: name.into(),
      work,
      dependencies: Vec::new(),
      max_retries: 0,
      retry_backoff: None,
      timeout: None,
    }
  }

  /// Declare a dependency on another step.
  pub fn depends_on(mut self, step: impl Into<String>) -> Self {
    self.dependencies.push(step.into());
    self
  }

  /// Set the retry budget (attempts after the first failure).
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  /// Set the delay policy between retry attempts.
  pub fn with_retry_backoff(mut self, backoff: RetryBackoff) -> Self {
    self.retry_backoff = Some(backoff);
    self
  }

  /// Set the per-attempt timeout.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

impl fmt::Debug for WorkflowStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkflowStep")
      .field("name", &self.name)
      .field("dependencies", &self.dependencies)
      .field("max_retries", &self.max_retries)
      .field("retry_backoff", &self.retry_backoff)
      .field("timeout", &self.timeout)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn constant_backoff_is_flat() {
    let backoff = RetryBackoff::Constant {
      delay: Duration::from_millis(100),
    };
    assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
    assert_eq!(backoff.delay_for(5), Duration::from_millis(100));
  }

  #[test]
  fn linear_backoff_scales_with_attempts() {
    let backoff = RetryBackoff::Linear {
      initial: Duration::from_millis(50),
    };
    assert_eq!(backoff.delay_for(1), Duration::from_millis(50));
    assert_eq!(backoff.delay_for(3), Duration::from_millis(150));
  }

  #[test]
  fn exponential_backoff_doubles() {
    let backoff = RetryBackoff::Exponential {
      initial: Duration::from_millis(10),
    };
    assert_eq!(backoff.delay_for(1), Duration::from_millis(10));
    assert_eq!(backoff.delay_for(2), Duration::from_millis(20));
    assert_eq!(backoff.delay_for(4), Duration::from_millis(80));
  }

  #[test]
  fn exponential_backoff_saturates_on_large_attempts() {
    let backoff = RetryBackoff::Exponential {
      initial: Duration::from_secs(1),
    };
    // Does not overflow; the exact cap is irrelevant.
    let _ = backoff.delay_for(64);
  }
}
