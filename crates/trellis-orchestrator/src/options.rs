//! Orchestrator configuration.

use trellis_workflow::RetryBackoff;

/// Recognized execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrchestratorOptions {
  /// Dispatch all ready steps together instead of one at a time.
  pub concurrent: bool,
  /// Stop dispatching new steps after the first permanent failure.
  pub fail_fast: bool,
  /// Backoff for steps that declare retries but no policy of their own.
  pub default_retry_backoff: Option<RetryBackoff>,
}
