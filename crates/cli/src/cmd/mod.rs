mod build;
mod cache;
mod channel;
mod container;
mod info;
mod list;
mod order;

use std::path::PathBuf;

use anyhow::{Context as _, Result};

use forge_lib::platform::{Platform, paths};
use forge_lib::recipe::{self, BuildGraph};

use crate::output::OutputFormat;

pub use build::{BuildArgs, cmd_build};
pub use cache::{cmd_cache_clear, cmd_cache_invalidate, cmd_cache_list, cmd_cache_status};
pub use channel::cmd_channel_list;
pub use container::{ContainerArgs, cmd_container_pull, cmd_container_shell, cmd_container_status};
pub use info::cmd_info;
pub use list::cmd_list;
pub use order::cmd_order;

/// Global settings shared by every command.
pub struct Context {
  pub recipes: PathBuf,
  pub output: PathBuf,
  pub channel: PathBuf,
  pub cache: PathBuf,
  pub platform: Option<Platform>,
  pub format: OutputFormat,
  pub verbose: u8,
}

impl Context {
  /// Fill unset directories from the environment and platform defaults.
  pub fn new(
    recipes: Option<PathBuf>,
    output: Option<PathBuf>,
    channel: Option<PathBuf>,
    cache: Option<PathBuf>,
    platform: Option<Platform>,
    format: OutputFormat,
    verbose: u8,
  ) -> Self {
    let output = output.unwrap_or_else(paths::output_dir);
    Self {
      recipes: recipes.unwrap_or_else(paths::recipes_dir),
      channel: channel.unwrap_or_else(|| paths::channel_dir(&output)),
      cache: cache.unwrap_or_else(paths::build_cache_dir),
      output,
      platform,
      format,
      verbose,
    }
  }

  /// The `--platform` override, else the host.
  pub fn platform(&self) -> Result<Platform> {
    match self.platform {
      Some(platform) => Ok(platform),
      None => Platform::current().context("Failed to detect the host platform, pass --platform"),
    }
  }

  pub fn load_graph(&self) -> Result<BuildGraph> {
    recipe::load(&self.recipes).with_context(|| format!("Failed to load recipes from {}", self.recipes.display()))
  }
}
