//! `forge container`: the runtime and image used by `forge build --container`.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;

use forge_lib::container::{Container, DEFAULT_IMAGE, Mount, Runtime};

use super::Context;
use crate::output::{print_info, print_json, print_stat, print_success};

#[derive(Debug, Clone, Args)]
pub struct ContainerArgs {
  /// Container runtime; detected when unset, podman before docker
  #[arg(long)]
  pub runtime: Option<Runtime>,

  /// Build image or alias (ubuntu22, rocky8, rocky9)
  #[arg(long, default_value = DEFAULT_IMAGE)]
  pub image: String,
}

impl ContainerArgs {
  pub fn container(&self) -> Result<Container> {
    let runtime = match self.runtime {
      Some(runtime) => runtime,
      None => Runtime::detect()?,
    };
    Ok(Container::new(runtime, &self.image))
  }
}

pub fn cmd_container_status(ctx: &Context, args: &ContainerArgs) -> Result<()> {
  let status = args.container()?.status();

  if ctx.format.is_json() {
    return print_json(&status);
  }

  print_stat("Runtime", &status.runtime.to_string());
  print_stat("Available", if status.available { "yes" } else { "no" });
  if let Some(version) = &status.version {
    print_stat("Version", version);
  }
  print_stat("Image", &status.image);
  Ok(())
}

pub fn cmd_container_pull(args: &ContainerArgs) -> Result<()> {
  let container = args.container()?;
  container
    .pull()
    .with_context(|| format!("Failed to pull {}", container.image))?;
  print_success(&format!("Pulled {}", container.image));
  Ok(())
}

/// Interactive shell with the recipe root mounted read-only and the output
/// directory writable. Returns whether the shell exited cleanly.
pub fn cmd_container_shell(ctx: &Context, args: &ContainerArgs, workdir: Option<PathBuf>) -> Result<bool> {
  let container = args.container()?;
  std::fs::create_dir_all(&ctx.output).with_context(|| format!("Failed to create {}", ctx.output.display()))?;

  let recipes = dunce::canonicalize(&ctx.recipes).unwrap_or_else(|_| ctx.recipes.clone());
  let output = dunce::canonicalize(&ctx.output).unwrap_or_else(|_| ctx.output.clone());
  let mut mounts = vec![Mount::writable(&output)];
  if recipes.is_dir() {
    mounts.push(Mount::read_only(&recipes));
  }
  let workdir = workdir.unwrap_or(output);

  print_info(&format!("Starting shell in {}", container.image));
  let status = container
    .shell_command(&mounts, Some(&workdir))
    .status()
    .with_context(|| format!("Failed to run {}", container.runtime))?;
  Ok(status.success())
}
