use std::collections::HashSet;
use std::mem;

use crate::error::DefinitionError;
use crate::graph::Graph;
use crate::step::WorkflowStep;
use crate::workflow::WorkflowDefinition;

/// Incremental, fluent declaration of a workflow.
///
/// Validation happens in two phases: name collisions and empty names fail
/// the offending [`add_step`](Self::add_step) call immediately; dependency
/// existence and acyclicity are checked once in [`build`](Self::build). A
/// builder that has produced a definition cannot be reused.
#[derive(Debug)]
pub struct WorkflowBuilder {
  name: String,
  description: String,
  steps: Vec<WorkflowStep>,
  finalized: bool,
}

impl WorkflowBuilder {
  /// Start a builder for a workflow with the given name.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: String::new(),
      steps: Vec::new(),
      finalized: false,
    }
  }

  /// Set a human-readable description.
  pub fn description(mut self, description: impl Into<String>) -> Self {
    self.description = description.into();
    self
  }

  /// Declare a step.
  pub fn add_step(&mut self, step: WorkflowStep) -> Result<&mut Self, DefinitionError> {
    if self.finalized {
      return Err(DefinitionError::BuilderFinalized);
    }
    if step.name.is_empty() {
      return Err(DefinitionError::EmptyStepName);
    }
    if self.steps.iter().any(|s| s.name == step.name) {
      return Err(DefinitionError::DuplicateStep(step.name));
    }
    self.steps.push(step);
    Ok(self)
  }

  /// Validate the full graph and produce an immutable definition.
  ///
  /// Every declared dependency must name a declared step, and the dependency
  /// graph must be acyclic. On success the builder is finalized and accepts
  /// no further steps.
  pub fn build(&mut self) -> Result<WorkflowDefinition, DefinitionError> {
    if self.finalized {
      return Err(DefinitionError::BuilderFinalized);
    }
    if self.steps.is_empty() {
      return Err(DefinitionError::EmptyWorkflow);
    }

    let names: HashSet<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();
    for step in &self.steps {
      for dep in &step.dependencies {
        if !names.contains(dep.as_str()) {
          return Err(DefinitionError::UnknownDependency {
            step: step.name.clone(),
            dependency: dep.clone(),
          });
        }
      }
    }

    if let Some(cycle) = Graph::new(&self.steps).find_cycle() {
      return Err(DefinitionError::CyclicDependency { cycle });
    }

    self.finalized = true;
    Ok(WorkflowDefinition::new(
      mem::take(&mut self.name),
      mem::take(&mut self.description),
      mem::take(&mut self.steps),
    ))
  }
}
