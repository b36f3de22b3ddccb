use std::collections::HashMap;

use crate::step::WorkflowStep;

/// Marker state for the depth-first cycle scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
  Unvisited,
  InProgress,
  Done,
}

/// Dependency graph structure for traversal and analysis.
///
/// Edges are derived from each step's declared dependencies. Adjacency lists
/// preserve declaration order, so every walk over the graph is deterministic.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Step names in declaration order.
  names: Vec<String>,
  /// Adjacency list: step name -> steps that depend on it.
  dependents: HashMap<String, Vec<String>>,
  /// Reverse adjacency: step name -> its declared dependencies.
  dependencies: HashMap<String, Vec<String>>,
  /// Steps with no dependencies.
  entry_points: Vec<String>,
}

impl Graph {
  /// Build a graph from steps in declaration order.
  pub fn new(steps: &[WorkflowStep]) -> Self {
    let names: Vec<String> = steps.iter().map(|s| s.name.clone()).collect();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();

    // Initialize all steps
    for step in steps {
      dependents.entry(step.name.clone()).or_default();
      dependencies.entry(step.name.clone()).or_default();
    }

    // Build adjacency lists
    for step in steps {
      for dep in &step.dependencies {
        dependents
          .entry(dep.clone())
          .or_default()
          .push(step.name.clone());
        dependencies
          .entry(step.name.clone())
          .or_default()
          .push(dep.clone());
      }
    }

    // Find entry points (no dependencies)
    let entry_points = steps
      .iter()
      .filter(|s| s.dependencies.is_empty())
      .map(|s| s.name.clone())
      .collect();

    Self {
      names,
      dependents,
      dependencies,
      entry_points,
    }
  }

  /// Get entry points (steps with no dependencies).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get the steps that depend on a given step.
  pub fn downstream(&self, step: &str) -> &[String] {
    self
      .dependents
      .get(step)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get the declared dependencies of a given step.
  pub fn upstream(&self, step: &str) -> &[String] {
    self
      .dependencies
      .get(step)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Scan for a dependency cycle.
  ///
  /// Iterative depth-first walk with a three-state marker: reaching a step
  /// that is still in progress closes a cycle. Roots and adjacency are
  /// visited in declaration order, so the same cycle is reported every time.
  pub fn find_cycle(&self) -> Option<Vec<String>> {
    let mut marks: HashMap<&str, Mark> = self
      .names
      .iter()
      .map(|n| (n.as_str(), Mark::Unvisited))
      .collect();

    for root in &self.names {
      if marks[root.as_str()] != Mark::Unvisited {
        continue;
      }

      // The walk in progress: (step, index of the next edge to follow).
      let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
      marks.insert(root.as_str(), Mark::InProgress);

      while let Some(&(name, edge)) = stack.last() {
        let children = self.downstream(name);
        if edge < children.len() {
          if let Some(frame) = stack.last_mut() {
            frame.1 += 1;
          }
          let next = children[edge].as_str();
          match marks[next] {
            Mark::Unvisited => {
              marks.insert(next, Mark::InProgress);
              stack.push((next, 0));
            }
            Mark::InProgress => {
              // Close the cycle: everything on the stack from `next` down.
              let start = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
              let mut cycle: Vec<String> =
                stack[start..].iter().map(|&(n, _)| n.to_string()).collect();
              cycle.push(next.to_string());
              return Some(cycle);
            }
            Mark::Done => {}
          }
        } else {
          marks.insert(name, Mark::Done);
          stack.pop();
        }
      }
    }

    None
  }
}

#[cfg(test)]
mod tests {
  use serde_json::Value;

  use super::*;
  use crate::step::StepWork;

  fn step(name: &str, deps: &[&str]) -> WorkflowStep {
    let mut step = WorkflowStep::new(name, StepWork::from_fn(|_| async { Ok(Value::Null) }));
    for dep in deps {
      step = step.depends_on(*dep);
    }
    step
  }

  #[test]
  fn diamond_has_no_cycle() {
    let graph = Graph::new(&[
      step("a", &[]),
      step("b", &["a"]),
      step("c", &["a"]),
      step("d", &["b", "c"]),
    ]);
    assert!(graph.find_cycle().is_none());
    assert_eq!(graph.entry_points(), ["a".to_string()]);
    assert_eq!(graph.downstream("a"), ["b".to_string(), "c".to_string()]);
    assert_eq!(graph.upstream("d"), ["b".to_string(), "c".to_string()]);
  }

  #[test]
  fn two_step_cycle_is_found() {
    let graph = Graph::new(&[step("a", &["b"]), step("b", &["a"])]);
    let cycle = graph.find_cycle().expect("cycle");
    assert_eq!(cycle.first(), cycle.last());
    assert!(cycle.len() >= 3);
  }

  #[test]
  fn self_dependency_is_a_cycle() {
    let graph = Graph::new(&[step("a", &["a"])]);
    let cycle = graph.find_cycle().expect("cycle");
    assert_eq!(cycle, ["a".to_string(), "a".to_string()]);
  }

  #[test]
  fn cycle_report_is_deterministic() {
    let build = || {
      Graph::new(&[
        step("a", &[]),
        step("b", &["d"]),
        step("c", &["b"]),
        step("d", &["c"]),
      ])
    };
    let first = build().find_cycle().expect("cycle");
    let second = build().find_cycle().expect("cycle");
    assert_eq!(first, second);
  }
}
