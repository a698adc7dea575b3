use serde::Serialize;
use thiserror::Error;

/// Recipe names in build order: every dependency precedes its dependents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildPlan(pub Vec<String>);

impl BuildPlan {
  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(String::as_str)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.0.iter().any(|n| n == name)
  }

  /// Zero-based position of `name` in the plan.
  pub fn position(&self, name: &str) -> Option<usize> {
    self.0.iter().position(|n| n == name)
  }
}

impl<'a> IntoIterator for &'a BuildPlan {
  type Item = &'a String;
  type IntoIter = std::slice::Iter<'a, String>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.iter()
  }
}

/// Recipes that could not be ordered because they sit on or behind a cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("dependency cycle among: {}", .unresolved.join(", "))]
pub struct CycleError {
  /// Sorted names of every recipe left with unmet dependencies.
  pub unresolved: Vec<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
  #[error(transparent)]
  Cycle(#[from] CycleError),

  #[error("unknown recipe '{0}'")]
  UnknownRecipe(String),
}
