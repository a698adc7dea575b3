//! forge-lib: build orchestration for native library recipes
//!
//! A run loads a tree of recipes, resolves them into a dependency ordered
//! plan, and builds each one in isolation unless an identical build is
//! already cached:
//! - `recipe`: recipe descriptors and the dependency graph
//! - `resolve`: deterministic build order and dependency waves
//! - `cache`: content-derived cache keys and recorded builds
//! - `execute`: running build scripts with an isolated environment
//! - `container`: podman and docker support for containerized builds
//! - `channel`: publishing artifacts into a local package channel
//! - `orchestrate`: a whole run, from plan to report

pub mod cache;
pub mod channel;
pub mod consts;
pub mod container;
pub mod execute;
pub mod orchestrate;
pub mod platform;
pub mod recipe;
pub mod resolve;
pub mod run_lock;
pub mod util;
