mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use forge_lib::platform::Platform;

use crate::cmd::{BuildArgs, ContainerArgs, Context};
use crate::output::{OutputFormat, print_error};

/// forge - build native libraries from recipes into a local package channel
#[derive(Parser)]
#[command(name = "forge")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Recipe root directory [env: FORGE_RECIPES] [default: ./recipes]
  #[arg(long, global = true)]
  recipes: Option<PathBuf>,

  /// Build output directory [env: FORGE_OUTPUT]
  #[arg(long, global = true)]
  output: Option<PathBuf>,

  /// Channel directory [env: FORGE_CHANNEL_DIR] [default: <output>/channel]
  #[arg(long, global = true)]
  channel_dir: Option<PathBuf>,

  /// Build cache directory [env: FORGE_CACHE_DIR]
  #[arg(long, global = true)]
  cache_dir: Option<PathBuf>,

  /// Target platform subdir (e.g. linux-64), defaults to the host
  #[arg(long, global = true)]
  platform: Option<Platform>,

  /// Output format
  #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  format: OutputFormat,

  /// Increase log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, global = true, action = ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// List recipes and their dependencies
  List,

  /// Show details for one recipe
  Info {
    /// Recipe name
    recipe: String,
  },

  /// Print the resolved build order
  Order {
    /// Only these recipes and their dependencies
    targets: Vec<String>,
  },

  /// Build recipes and publish them to the channel
  Build(BuildArgs),

  /// Inspect or modify the build cache
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },

  /// Inspect the local channel
  Channel {
    #[command(subcommand)]
    command: ChannelCommand,
  },

  /// Manage the runtime and image for container builds
  Container {
    #[command(subcommand)]
    command: ContainerCommand,
  },
}

#[derive(Subcommand)]
enum CacheCommand {
  /// Summarize the cache
  Status,
  /// List cache entries
  List,
  /// Remove every cache entry
  Clear {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    force: bool,
  },
  /// Mark a recipe's cache entries stale
  Invalidate {
    /// Recipe name
    recipe: String,
  },
}

#[derive(Subcommand)]
enum ChannelCommand {
  /// List published packages
  List {
    /// Only this bucket (e.g. linux-64, noarch)
    bucket: Option<String>,
  },
}

#[derive(Subcommand)]
enum ContainerCommand {
  /// Show the runtime, its version and the build image
  Status(ContainerArgs),
  /// Pull the build image
  Pull(ContainerArgs),
  /// Open an interactive shell in the build image
  Shell {
    #[command(flatten)]
    opts: ContainerArgs,
    /// Working directory inside the container [default: the output directory]
    #[arg(short, long)]
    workdir: Option<PathBuf>,
  },
}

fn init_tracing(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn run(cli: Cli) -> Result<bool> {
  let ctx = Context::new(
    cli.recipes,
    cli.output,
    cli.channel_dir,
    cli.cache_dir,
    cli.platform,
    cli.format,
    cli.verbose,
  );

  match cli.command {
    Commands::Build(args) => return cmd::cmd_build(&ctx, &args),
    Commands::List => cmd::cmd_list(&ctx)?,
    Commands::Info { recipe } => cmd::cmd_info(&ctx, &recipe)?,
    Commands::Order { targets } => cmd::cmd_order(&ctx, &targets)?,
    Commands::Cache { command } => match command {
      CacheCommand::Status => cmd::cmd_cache_status(&ctx)?,
      CacheCommand::List => cmd::cmd_cache_list(&ctx)?,
      CacheCommand::Clear { force } => cmd::cmd_cache_clear(&ctx, force)?,
      CacheCommand::Invalidate { recipe } => cmd::cmd_cache_invalidate(&ctx, &recipe)?,
    },
    Commands::Channel { command } => match command {
      ChannelCommand::List { bucket } => cmd::cmd_channel_list(&ctx, bucket.as_deref())?,
    },
    Commands::Container { command } => match command {
      ContainerCommand::Status(opts) => cmd::cmd_container_status(&ctx, &opts)?,
      ContainerCommand::Pull(opts) => cmd::cmd_container_pull(&opts)?,
      ContainerCommand::Shell { opts, workdir } => return cmd::cmd_container_shell(&ctx, &opts, workdir),
    },
  }
  Ok(true)
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match run(cli) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}
