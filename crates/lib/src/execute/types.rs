//! Types for running one recipe's build script.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheKey;
use crate::platform::Platform;
use crate::recipe::Recipe;

/// Why a build did not produce an artifact.
///
/// Messages are captured as strings so outcomes can be cloned into reports
/// and serialized.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecuteError {
  #[error("no build script for platform {platform}")]
  UnsupportedPlatform { platform: String },

  #[error("build script not found: {}", .path.display())]
  ScriptNotFound { path: PathBuf },

  #[error("failed to start build script: {message}")]
  Spawn { message: String },

  #[error("{}", describe_exit(.code, .signal))]
  NonZeroExit { code: Option<i32>, signal: Option<i32> },

  #[error("build did not produce declared outputs: {}", display_paths(.missing))]
  MissingOutputs { missing: Vec<PathBuf> },

  #[error("build was cancelled")]
  Cancelled,

  #[error("build timed out after {after:?}")]
  TimedOut { after: Duration },

  #[error("io error: {message}")]
  Io { message: String },
}

fn describe_exit(code: &Option<i32>, signal: &Option<i32>) -> String {
  match (*code, *signal) {
    (Some(code), _) => format!("build script exited with code {code}"),
    (None, Some(signal)) => format!("build script killed by signal {signal}"),
    (None, None) => "build script exited abnormally".to_string(),
  }
}

fn display_paths(paths: &[PathBuf]) -> String {
  paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}

impl From<std::io::Error> for ExecuteError {
  fn from(e: std::io::Error) -> Self {
    ExecuteError::Io { message: e.to_string() }
  }
}

/// Install prefix of an already built dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyPrefix {
  pub name: String,
  pub prefix: PathBuf,
}

/// Everything needed to build one recipe.
#[derive(Debug, Clone)]
pub struct BuildJob {
  pub recipe: Recipe,
  pub key: CacheKey,
  pub platform: Platform,
  /// Every dependency, direct ones first in declaration order, then the
  /// rest of the closure breadth first.
  pub dependencies: Vec<DependencyPrefix>,
}

/// Executor settings shared by every job of a run.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
  /// Root holding `work/`, `artifacts/` and `logs/`.
  pub output_dir: PathBuf,
  /// Exported to scripts as `CPU_COUNT` and `MAKEFLAGS=-j<n>`.
  pub cpu_count: usize,
  /// Per-recipe wall clock limit.
  pub timeout: Option<Duration>,
  /// Parent environment variables copied into the cleared build environment.
  pub passthrough_env: Vec<String>,
  /// Interpreter override for every script.
  pub shell: Option<String>,
  /// Echo child output as `[recipe] line`, stdout lines to stdout and
  /// stderr lines to stderr.
  pub echo: bool,
  /// Time between TERM and KILL when stopping a build.
  pub kill_grace: Duration,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      output_dir: crate::platform::paths::output_dir(),
      cpu_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
      timeout: None,
      passthrough_env: vec!["PATH".to_string()],
      shell: None,
      echo: true,
      kill_grace: Duration::from_secs(5),
    }
  }
}

impl ExecutorConfig {
  pub fn work_dir(&self, recipe: &str) -> PathBuf {
    self.output_dir.join("work").join(recipe)
  }

  pub fn artifacts_dir(&self) -> PathBuf {
    self.output_dir.join("artifacts")
  }

  /// Final install prefix for a job.
  pub fn artifact_dir(&self, recipe: &Recipe, key: &CacheKey) -> PathBuf {
    self
      .artifacts_dir()
      .join(format!("{}-{}-{}", recipe.name, recipe.version, key.short()))
  }

  /// Install prefix the script writes into; renamed to [`Self::artifact_dir`] on success.
  pub fn staging_dir(&self, recipe: &Recipe, key: &CacheKey) -> PathBuf {
    self
      .artifacts_dir()
      .join(format!("{}-{}-{}.partial", recipe.name, recipe.version, key.short()))
  }

  pub fn logs_dir(&self) -> PathBuf {
    self.output_dir.join("logs")
  }
}

/// Result of one executor invocation.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
  /// The final artifact location on success.
  pub result: Result<PathBuf, ExecuteError>,
  /// Log file holding the full output, when the script was started.
  pub log_path: Option<PathBuf>,
  /// Last lines of output, oldest first.
  pub tail: Vec<String>,
  pub duration: Duration,
}

impl ExecutionOutcome {
  /// Outcome for a build that failed before a process was started.
  pub fn failed(error: ExecuteError) -> Self {
    Self {
      result: Err(error),
      log_path: None,
      tail: Vec::new(),
      duration: Duration::ZERO,
    }
  }

  pub fn is_success(&self) -> bool {
    self.result.is_ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exit_messages() {
    let err = ExecuteError::NonZeroExit {
      code: Some(2),
      signal: None,
    };
    assert_eq!(err.to_string(), "build script exited with code 2");

    let err = ExecuteError::NonZeroExit {
      code: None,
      signal: Some(9),
    };
    assert_eq!(err.to_string(), "build script killed by signal 9");
  }

  #[test]
  fn staging_and_final_paths_share_a_directory() {
    let config = ExecutorConfig {
      output_dir: PathBuf::from("/out"),
      ..Default::default()
    };
    let recipe = Recipe::new("zlib", "1.3", "/r/zlib");
    let key = CacheKey("abcdef0123456789".repeat(4));

    assert_eq!(
      config.artifact_dir(&recipe, &key),
      PathBuf::from("/out/artifacts/zlib-1.3-abcdef012345")
    );
    assert_eq!(
      config.staging_dir(&recipe, &key),
      PathBuf::from("/out/artifacts/zlib-1.3-abcdef012345.partial")
    );
    assert_eq!(config.work_dir("zlib"), PathBuf::from("/out/work/zlib"));
  }

  #[test]
  fn errors_serialize_with_kind_tag() {
    let json = serde_json::to_value(ExecuteError::Cancelled).unwrap();
    assert_eq!(json["kind"], "cancelled");
  }
}
