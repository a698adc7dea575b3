//! Arena of loaded recipes and their dependency edges.
//!
//! Recipes live in a [`petgraph::graph::DiGraph`]; the [`NodeIndex`] of a node is
//! the handle everything else uses to refer to a recipe. Edges run from a
//! dependency to its dependent. The graph is not checked for cycles here, that
//! is the resolver's job.

use std::collections::{BTreeMap, VecDeque};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use super::types::{LoadError, Recipe};

/// All recipes of a recipe root, immutable after load.
#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
  graph: DiGraph<Recipe, ()>,
  by_name: BTreeMap<String, NodeIndex>,
}

impl BuildGraph {
  /// Build the graph, rejecting duplicate names and dangling or self references.
  pub fn from_recipes(recipes: impl IntoIterator<Item = Recipe>) -> Result<Self, LoadError> {
    let mut graph = DiGraph::new();
    let mut by_name: BTreeMap<String, NodeIndex> = BTreeMap::new();

    // First pass: one node per recipe
    for recipe in recipes {
      if let Some(&existing) = by_name.get(&recipe.name) {
        let first: &Recipe = &graph[existing];
        return Err(LoadError::DuplicateRecipe {
          name: recipe.name.clone(),
          first: first.dir.clone(),
          second: recipe.dir.clone(),
        });
      }
      let name = recipe.name.clone();
      let idx = graph.add_node(recipe);
      by_name.insert(name, idx);
    }

    // Second pass: dependency -> dependent edges
    let mut edges = Vec::new();
    for (name, &idx) in &by_name {
      for dep in &graph[idx].dependencies {
        if dep == name {
          return Err(LoadError::SelfDependency { name: name.clone() });
        }
        let dep_idx = by_name.get(dep).ok_or_else(|| LoadError::UnknownDependency {
          recipe: name.clone(),
          dependency: dep.clone(),
        })?;
        edges.push((*dep_idx, idx));
      }
    }
    for (from, to) in edges {
      graph.add_edge(from, to, ());
    }

    Ok(Self { graph, by_name })
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  pub fn contains(&self, name: &str) -> bool {
    self.by_name.contains_key(name)
  }

  /// Handle of the named recipe.
  pub fn id(&self, name: &str) -> Option<NodeIndex> {
    self.by_name.get(name).copied()
  }

  pub fn get(&self, name: &str) -> Option<&Recipe> {
    self.id(name).map(|idx| &self.graph[idx])
  }

  /// Recipe behind a handle. Handles come from this graph, so indexing cannot fail.
  pub fn recipe(&self, idx: NodeIndex) -> &Recipe {
    &self.graph[idx]
  }

  /// Recipe names in ascending order.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.by_name.keys().map(String::as_str)
  }

  /// Recipes in name order.
  pub fn recipes(&self) -> impl Iterator<Item = &Recipe> {
    self.by_name.values().map(|&idx| &self.graph[idx])
  }

  pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
    self.graph.node_indices()
  }

  /// Handles of the direct dependencies of `idx`.
  pub fn dependencies(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
    self.graph.neighbors_directed(idx, Direction::Incoming)
  }

  /// Names of everything `name` depends on: direct dependencies in
  /// declaration order, then indirect ones breadth first. Empty for an
  /// unknown name.
  pub fn dependency_closure(&self, name: &str) -> Vec<&str> {
    let mut closure: Vec<&str> = Vec::new();
    let mut queue: VecDeque<&Recipe> = self.get(name).into_iter().collect();

    while let Some(recipe) = queue.pop_front() {
      for dep in &recipe.dependencies {
        if dep != name && !closure.contains(&dep.as_str()) {
          closure.push(dep);
          queue.extend(self.get(dep));
        }
      }
    }
    closure
  }

  /// Handles of the recipes that directly depend on `idx`.
  pub fn dependents(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
    self.graph.neighbors_directed(idx, Direction::Outgoing)
  }
}
