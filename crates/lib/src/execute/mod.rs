//! Build execution: run one recipe's platform build script in isolation.
//!
//! A build gets a fresh work directory and a staging install prefix. The
//! script runs in a cleared environment, in its own process group, with its
//! output streamed live to a per-recipe log. Only a successful build with all
//! declared outputs present is moved to its final artifact location; anything
//! else leaves no trace in the artifacts directory.
//!
//! In container mode the same script runs inside an image instead, with the
//! recipe, work, staging and dependency directories mounted at their host paths.

pub mod env;
pub mod output;
pub mod process;
pub mod shell;
pub mod types;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consts::OUTPUT_TAIL_LINES;
use crate::container::{Container, Mount};
use crate::util::fs::unix_now;

use env::{BuildDirs, build_env};
use output::LogWriter;
use process::{ProcessEnd, ScriptCommand, exit_details};

pub use types::{BuildJob, DependencyPrefix, ExecuteError, ExecutionOutcome, ExecutorConfig};

/// Something that can turn a [`BuildJob`] into an artifact.
///
/// The orchestrator is generic over this so runs can be driven without
/// spawning real processes.
pub trait Executor: Send + Sync {
  fn execute(&self, job: BuildJob, cancel: CancellationToken) -> impl Future<Output = ExecutionOutcome> + Send;
}

/// Runs build scripts as child processes, on the host or in a container.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
  config: ExecutorConfig,
  container: Option<Container>,
}

impl ScriptExecutor {
  pub fn new(mut config: ExecutorConfig) -> Self {
    if let Ok(output_dir) = std::path::absolute(&config.output_dir) {
      config.output_dir = output_dir;
    }
    Self {
      config,
      container: None,
    }
  }

  /// Run every build script inside `container`.
  pub fn in_container(config: ExecutorConfig, container: Container) -> Self {
    Self {
      container: Some(container),
      ..Self::new(config)
    }
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.config
  }

  pub fn container(&self) -> Option<&Container> {
    self.container.as_ref()
  }

  /// Program, arguments and process environment that run `script`.
  fn launch(
    &self,
    job: &BuildJob,
    script: &Path,
    dirs: &BuildDirs<'_>,
    env: BTreeMap<String, String>,
  ) -> (String, Vec<String>, BTreeMap<String, String>) {
    let shell = self.config.shell.as_deref();
    let Some(container) = &self.container else {
      let (program, args) = shell::interpreter_for(script, shell);
      return (program, args, env);
    };

    let mut mounts = vec![
      Mount::read_only(&job.recipe.dir),
      Mount::writable(dirs.work),
      Mount::writable(dirs.prefix),
    ];
    mounts.extend(job.dependencies.iter().map(|dep| Mount::read_only(&dep.prefix)));
    let args = container.run_args(&mounts, dirs.work, &env, shell.unwrap_or("/bin/sh"));
    (container.runtime.program().to_string(), args, container.client_env())
  }

  /// Resolve the script and lay out fresh work, staging and log directories.
  async fn prepare(&self, job: &BuildJob, log_path: &Path) -> Result<Prepared, ExecuteError> {
    let recipe = &job.recipe;
    let config = &self.config;

    let script = recipe
      .script_for(&job.platform)
      .ok_or_else(|| ExecuteError::UnsupportedPlatform {
        platform: job.platform.subdir().to_string(),
      })?;
    if !script.path.is_file() {
      return Err(ExecuteError::ScriptNotFound { path: script.path });
    }

    let prepared = Prepared {
      script_key: script.key,
      script: script.path,
      work: config.work_dir(&recipe.name),
      staging: config.staging_dir(recipe, &job.key),
      artifact: config.artifact_dir(recipe, &job.key),
    };

    recreate_dir(&prepared.work).await?;
    tokio::fs::create_dir_all(prepared.tmp()).await?;
    recreate_dir(&prepared.staging).await?;
    if let Some(logs) = log_path.parent() {
      tokio::fs::create_dir_all(logs).await?;
    }
    Ok(prepared)
  }

  async fn run_job(&self, job: &BuildJob, cancel: &CancellationToken, log_path: &Path) -> RunResult {
    let recipe = &job.recipe;
    let config = &self.config;

    let prepared = match self.prepare(job, log_path).await {
      Ok(prepared) => prepared,
      Err(e) => return e.into(),
    };
    let Prepared {
      script_key,
      script,
      work,
      staging,
      artifact,
    } = &prepared;
    let tmp = prepared.tmp();

    let dirs = BuildDirs {
      work,
      tmp: &tmp,
      prefix: staging,
    };
    let env = build_env(job, config, &dirs);
    let (program, args, env) = self.launch(job, script, &dirs, env);

    let (tx, rx) = mpsc::channel(256);
    let writer = LogWriter::spawn(
      log_path.to_path_buf(),
      recipe.name.clone(),
      config.echo,
      OUTPUT_TAIL_LINES,
      rx,
    );

    match &self.container {
      Some(container) => info!(
        recipe = %recipe.name,
        script = %script_key,
        image = %container.image,
        "running build script in container"
      ),
      None => info!(recipe = %recipe.name, script = %script_key, "running build script"),
    }
    let command = ScriptCommand {
      program: &program,
      args: &args,
      script,
      cwd: work,
      env: &env,
    };
    let end = process::run(command, tx, cancel, config.timeout, config.kill_grace).await;

    let tail = match writer.finish().await {
      Ok(tail) => tail,
      Err(e) => {
        warn!(recipe = %recipe.name, error = %e, "failed to write build log");
        Vec::new()
      }
    };

    let classified = match end {
      Ok(ProcessEnd::Exited(status)) if status.success() => {
        finalize(staging, artifact, &recipe.outputs).await
      }
      Ok(ProcessEnd::Exited(status)) => {
        let (code, signal) = exit_details(&status);
        Err(ExecuteError::NonZeroExit { code, signal })
      }
      Ok(ProcessEnd::Cancelled) => Err(ExecuteError::Cancelled),
      Ok(ProcessEnd::TimedOut(after)) => Err(ExecuteError::TimedOut { after }),
      Err(e) => Err(e),
    };

    if classified.is_err() {
      remove_dir_if_exists(staging).await;
    }

    RunResult {
      result: classified,
      started: true,
      tail,
    }
  }
}

/// Internal result carrying whether a process was started and its tail.
struct RunResult {
  result: Result<PathBuf, ExecuteError>,
  started: bool,
  tail: Vec<String>,
}

impl From<ExecuteError> for RunResult {
  fn from(error: ExecuteError) -> Self {
    Self {
      result: Err(error),
      started: false,
      tail: Vec::new(),
    }
  }
}

struct Prepared {
  script_key: String,
  script: PathBuf,
  work: PathBuf,
  staging: PathBuf,
  artifact: PathBuf,
}

impl Prepared {
  fn tmp(&self) -> PathBuf {
    self.work.join("tmp")
  }
}

impl Executor for ScriptExecutor {
  async fn execute(&self, job: BuildJob, cancel: CancellationToken) -> ExecutionOutcome {
    let started_at = Instant::now();
    let name = job.recipe.name.clone();
    let log_path = self.config.logs_dir().join(format!("{name}-{}.log", unix_now()));

    let run = self.run_job(&job, &cancel, &log_path).await;
    let duration = started_at.elapsed();

    match &run.result {
      Ok(artifact) => info!(recipe = %name, artifact = %artifact.display(), ?duration, "build succeeded"),
      Err(ExecuteError::Cancelled) => info!(recipe = %name, "build cancelled"),
      Err(e) => error!(recipe = %name, error = %e, "build failed"),
    }

    ExecutionOutcome {
      result: run.result,
      log_path: run.started.then_some(log_path),
      tail: run.tail,
      duration,
    }
  }
}

/// Check declared outputs, then move the staging prefix to its final place.
async fn finalize(staging: &Path, artifact: &Path, outputs: &[PathBuf]) -> Result<PathBuf, ExecuteError> {
  let missing: Vec<PathBuf> = outputs
    .iter()
    .filter(|output| !staging.join(output).exists())
    .cloned()
    .collect();
  if !missing.is_empty() {
    return Err(ExecuteError::MissingOutputs { missing });
  }

  // A previous build with the same key is replaced wholesale
  remove_dir_if_exists(artifact).await;
  tokio::fs::rename(staging, artifact).await?;
  debug!(artifact = %artifact.display(), "artifact finalized");
  Ok(artifact.to_path_buf())
}

async fn recreate_dir(path: &Path) -> std::io::Result<()> {
  match tokio::fs::remove_dir_all(path).await {
    Ok(()) => {}
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => return Err(e),
  }
  tokio::fs::create_dir_all(path).await
}

async fn remove_dir_if_exists(path: &Path) {
  if let Err(e) = tokio::fs::remove_dir_all(path).await
    && e.kind() != std::io::ErrorKind::NotFound
  {
    warn!(path = %path.display(), error = %e, "failed to remove directory");
  }
}
