//! Recipe store: descriptors on disk to a validated [`BuildGraph`].

mod graph;
mod store;
mod types;

pub use graph::BuildGraph;
pub use store::{load, load_defaults, parse_descriptor};
pub use types::{LoadError, Recipe, RecipeConfig, ScriptRef};
