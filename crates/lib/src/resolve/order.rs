//! Deterministic topological ordering over a [`BuildGraph`].
//!
//! Kahn's algorithm with the ready set kept in a min-heap on recipe name, so
//! among all valid orders the lexicographically smallest choice is taken at
//! every step and the same input always produces the same plan.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

use petgraph::graph::NodeIndex;
use tracing::debug;

use super::types::{BuildPlan, CycleError, ResolveError};
use crate::recipe::BuildGraph;

/// Order every recipe in the graph.
pub fn order(graph: &BuildGraph) -> Result<BuildPlan, CycleError> {
  let all: HashSet<NodeIndex> = graph.node_indices().collect();
  kahn(graph, &all)
}

/// Order `targets` and everything they transitively depend on.
pub fn subset<S: AsRef<str>>(graph: &BuildGraph, targets: &[S]) -> Result<BuildPlan, ResolveError> {
  let mut closure: HashSet<NodeIndex> = HashSet::new();
  let mut stack = Vec::new();

  for target in targets {
    let target = target.as_ref();
    let idx = graph
      .id(target)
      .ok_or_else(|| ResolveError::UnknownRecipe(target.to_string()))?;
    stack.push(idx);
  }

  while let Some(idx) = stack.pop() {
    if closure.insert(idx) {
      stack.extend(graph.dependencies(idx));
    }
  }

  debug!(targets = targets.len(), closure = closure.len(), "resolved target closure");
  Ok(kahn(graph, &closure)?)
}

/// Group a plan by dependency depth.
///
/// Wave 0 holds recipes with no dependencies inside the plan; a recipe sits
/// one wave after its deepest in-plan dependency. Waves are name-sorted.
pub fn waves(graph: &BuildGraph, plan: &BuildPlan) -> Vec<Vec<String>> {
  let mut depth: HashMap<&str, usize> = HashMap::new();
  let mut grouped: BTreeMap<usize, Vec<String>> = BTreeMap::new();

  // Plan order guarantees dependencies are visited first
  for name in plan.iter() {
    let level = graph
      .id(name)
      .map(|idx| {
        graph
          .dependencies(idx)
          .filter_map(|dep| depth.get(graph.recipe(dep).name.as_str()))
          .map(|d| d + 1)
          .max()
          .unwrap_or(0)
      })
      .unwrap_or(0);

    depth.insert(name, level);
    grouped.entry(level).or_default().push(name.to_string());
  }

  grouped
    .into_values()
    .map(|mut wave| {
      wave.sort();
      wave
    })
    .collect()
}

fn kahn(graph: &BuildGraph, nodes: &HashSet<NodeIndex>) -> Result<BuildPlan, CycleError> {
  let mut in_degree: HashMap<NodeIndex, usize> = nodes
    .iter()
    .map(|&idx| {
      let count = graph.dependencies(idx).filter(|dep| nodes.contains(dep)).count();
      (idx, count)
    })
    .collect();

  let mut ready: BinaryHeap<Reverse<(&str, NodeIndex)>> = in_degree
    .iter()
    .filter(|&(_, &deg)| deg == 0)
    .map(|(&idx, _)| Reverse((graph.recipe(idx).name.as_str(), idx)))
    .collect();

  let mut ordered = Vec::with_capacity(nodes.len());

  while let Some(Reverse((name, idx))) = ready.pop() {
    ordered.push(name.to_string());

    for dependent in graph.dependents(idx) {
      if let Some(deg) = in_degree.get_mut(&dependent) {
        *deg -= 1;
        if *deg == 0 {
          ready.push(Reverse((graph.recipe(dependent).name.as_str(), dependent)));
        }
      }
    }
  }

  if ordered.len() < nodes.len() {
    let mut unresolved: Vec<String> = in_degree
      .into_iter()
      .filter(|&(_, deg)| deg > 0)
      .map(|(idx, _)| graph.recipe(idx).name.clone())
      .collect();
    unresolved.sort();
    return Err(CycleError { unresolved });
  }

  Ok(BuildPlan(ordered))
}
