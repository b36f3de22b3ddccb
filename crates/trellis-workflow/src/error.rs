use thiserror::Error;

/// Errors raised while declaring or validating a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
  #[error("duplicate step name: '{0}'")]
  DuplicateStep(String),

  #[error("step '{step}' depends on unknown step '{dependency}'")]
  UnknownDependency { step: String, dependency: String },

  #[error("cyclic dependency: {}", .cycle.join(" -> "))]
  CyclicDependency { cycle: Vec<String> },

  #[error("workflow has no steps")]
  EmptyWorkflow,

  #[error("step name must not be empty")]
  EmptyStepName,

  #[error("builder already produced a definition")]
  BuilderFinalized,
}
