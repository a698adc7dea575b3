//! `forge build`: build recipes with their dependencies and publish them.

use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use forge_lib::cache::BuildCache;
use forge_lib::channel::ChannelPublisher;
use forge_lib::execute::{ExecutorConfig, ScriptExecutor};
use forge_lib::orchestrate::{BuildReport, BuildResult, BuildState, Orchestrator, OrchestratorOptions, Selection};
use forge_lib::platform::Platform;
use forge_lib::platform::arch::Arch;
use forge_lib::platform::os::Os;

use super::Context;
use super::container::ContainerArgs;
use crate::output::{
  format_duration, print_detail, print_failure, print_info, print_json, print_skipped, print_stat, print_success,
  print_warning, symbols,
};

#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Recipes to build, with their dependencies
  #[arg(id = "targets", value_name = "RECIPES", required_unless_present = "all", conflicts_with = "all")]
  pub recipes: Vec<String>,

  /// Build every recipe
  #[arg(long)]
  pub all: bool,

  /// Ignore the cache and rebuild; results are still recorded
  #[arg(long)]
  pub no_cache: bool,

  /// Keep building recipes that do not depend on a failed one
  #[arg(long)]
  pub continue_on_error: bool,

  /// Concurrent builds; 0 uses every available CPU
  #[arg(short, long, default_value_t = 1)]
  pub jobs: usize,

  /// Per-recipe time limit (e.g. 30m, 1h)
  #[arg(long, value_parser = humantime::parse_duration)]
  pub timeout: Option<Duration>,

  /// Do not echo build script output
  #[arg(short, long)]
  pub quiet: bool,

  /// Run build scripts inside a Linux container
  #[arg(long)]
  pub container: bool,

  #[command(flatten)]
  pub container_opts: ContainerArgs,
}

/// Container builds always target Linux on the host architecture unless a
/// Linux platform is named explicitly.
fn container_platform(requested: Option<Platform>) -> Result<Platform> {
  match requested {
    Some(platform) if platform.os == Os::Linux => Ok(platform),
    Some(platform) => bail!("Container builds target Linux, not {platform}"),
    None => {
      let arch = Arch::current().context("Failed to detect the host architecture, pass --platform")?;
      Ok(Platform::new(arch, Os::Linux))
    }
  }
}

/// Returns whether every planned recipe ended Succeeded or Cached.
pub fn cmd_build(ctx: &Context, args: &BuildArgs) -> Result<bool> {
  let platform = if args.container {
    container_platform(ctx.platform)?
  } else {
    ctx.platform()?
  };
  let graph = ctx.load_graph()?;

  let mut config = ExecutorConfig {
    output_dir: ctx.output.clone(),
    timeout: args.timeout,
    echo: !args.quiet && !ctx.format.is_json(),
    ..Default::default()
  };
  let jobs = match args.jobs {
    0 => config.cpu_count,
    n => n,
  };
  if jobs > 1 {
    // Parallel builds share the machine
    config.cpu_count = (config.cpu_count / jobs).max(1);
  }

  let executor = if args.container {
    let container = args.container_opts.container()?;
    ScriptExecutor::in_container(config, container)
  } else {
    ScriptExecutor::new(config)
  };

  let options = OrchestratorOptions {
    platform,
    no_cache: args.no_cache,
    continue_on_error: args.continue_on_error,
    jobs,
  };
  let orchestrator = Orchestrator::new(
    graph,
    BuildCache::new(&ctx.cache),
    ChannelPublisher::new(&ctx.channel),
    executor,
    options,
  );

  let selection = if args.all {
    Selection::All
  } else if args.recipes.is_empty() {
    bail!("Nothing to build: name a recipe or pass --all");
  } else {
    Selection::Targets(args.recipes.clone())
  };

  let _lock = orchestrator.lock("build").context("Failed to acquire run lock")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt.block_on(async {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, stopping builds");
        interrupt.cancel();
      }
    });
    orchestrator.run(&selection, cancel).await
  })?;

  if ctx.format.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report);
  }

  Ok(report.is_success())
}

fn print_report(report: &BuildReport) {
  println!();
  for result in &report.results {
    print_result(result);
  }

  for warning in &report.warnings {
    print_warning(&warning.to_string());
  }
  for result in report.results.iter().filter(|r| r.publish_error.is_some()) {
    print_warning(&format!(
      "{} built but was not published: {}",
      result.recipe,
      result.publish_error.as_deref().unwrap_or_default()
    ));
  }

  let counts = report.counts();
  println!();
  if report.is_success() {
    print_success(&format!("Build complete for {}", report.platform));
  } else {
    print_failure(&format!("Build failed for {}", report.platform));
  }
  print_stat("Built", &counts.succeeded.to_string());
  print_stat("Cached", &counts.cached.to_string());
  print_stat("Failed", &counts.failed.to_string());
  print_stat("Skipped", &counts.skipped.to_string());
  print_stat("Duration", &format_duration(report.duration));
}

fn print_result(result: &BuildResult) {
  let label = format!("{} {}", result.recipe, result.version);
  let published = result
    .published
    .as_deref()
    .map(|bucket| format!(" {} {bucket}", symbols::ARROW))
    .unwrap_or_default();

  match result.state {
    BuildState::Succeeded => print_success(&format!(
      "{label} built in {}{published}",
      format_duration(result.duration)
    )),
    BuildState::Cached => print_info(&format!("{label} cached{published}")),
    BuildState::Failed => {
      print_failure(&format!("{label} failed: {}", result.reason().unwrap_or_default()));
      if let Some(log) = &result.log_path {
        print_detail(&format!("log: {}", log.display()));
      }
      for line in &result.tail {
        print_detail(line);
      }
    }
    BuildState::Skipped => print_skipped(&format!("{label} skipped: {}", result.reason().unwrap_or_default())),
    BuildState::Pending | BuildState::Building => print_skipped(&format!("{label} {}", result.state)),
  }
}
