//! Dependency resolution: build plans, target subsets and parallel waves.

mod order;
mod types;

pub use order::{order, subset, waves};
pub use types::{BuildPlan, CycleError, ResolveError};
