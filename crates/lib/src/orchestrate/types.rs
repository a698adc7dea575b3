//! Run options, per-recipe results and the final report.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::cache::CacheWarning;
use crate::channel::PublishError;
use crate::execute::ExecuteError;
use crate::platform::Platform;
use crate::recipe::LoadError;
use crate::resolve::ResolveError;
use crate::run_lock::RunLockError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
  Pending,
  Cached,
  Building,
  Succeeded,
  Failed,
  Skipped,
}

impl BuildState {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, BuildState::Pending | BuildState::Building)
  }

  /// Cached or Succeeded: an artifact exists for dependents.
  pub fn is_ok(&self) -> bool {
    matches!(self, BuildState::Cached | BuildState::Succeeded)
  }
}

impl std::fmt::Display for BuildState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      BuildState::Pending => "pending",
      BuildState::Cached => "cached",
      BuildState::Building => "building",
      BuildState::Succeeded => "succeeded",
      BuildState::Failed => "failed",
      BuildState::Skipped => "skipped",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
  #[error("dependency '{dependency}' did not build")]
  DependencyFailed { dependency: String },

  #[error("aborted after an earlier failure")]
  Aborted,

  #[error("run was cancelled")]
  Cancelled,
}

/// Outcome for one planned recipe.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
  pub recipe: String,
  pub version: String,
  pub state: BuildState,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cache_key: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub artifact: Option<PathBuf>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failure: Option<ExecuteError>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub skip_reason: Option<SkipReason>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub log_path: Option<PathBuf>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub tail: Vec<String>,
  /// Bucket the artifact is available from in the channel.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub published: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub publish_error: Option<String>,
  #[serde(rename = "duration_ms", serialize_with = "as_millis")]
  pub duration: Duration,
}

impl BuildResult {
  pub fn pending(recipe: &str, version: &str) -> Self {
    Self {
      recipe: recipe.to_string(),
      version: version.to_string(),
      state: BuildState::Pending,
      cache_key: None,
      artifact: None,
      failure: None,
      skip_reason: None,
      log_path: None,
      tail: Vec::new(),
      published: None,
      publish_error: None,
      duration: Duration::ZERO,
    }
  }

  pub fn skip(&mut self, reason: SkipReason) {
    self.state = BuildState::Skipped;
    self.skip_reason = Some(reason);
  }

  pub fn fail(&mut self, error: ExecuteError) {
    self.state = BuildState::Failed;
    self.failure = Some(error);
  }

  /// One-line reason for non-successful states.
  pub fn reason(&self) -> Option<String> {
    match self.state {
      BuildState::Failed => self.failure.as_ref().map(ToString::to_string),
      BuildState::Skipped => self.skip_reason.as_ref().map(ToString::to_string),
      _ => None,
    }
  }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_u64(duration.as_millis() as u64)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
  pub succeeded: usize,
  pub cached: usize,
  pub failed: usize,
  pub skipped: usize,
  pub publish_failures: usize,
}

/// Everything a run did, one result per planned recipe in plan order.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
  pub platform: String,
  pub results: Vec<BuildResult>,
  pub warnings: Vec<CacheWarning>,
  #[serde(rename = "duration_ms", serialize_with = "as_millis")]
  pub duration: Duration,
}

impl BuildReport {
  /// True when every planned recipe is Succeeded or Cached. Publish failures
  /// do not count against success.
  pub fn is_success(&self) -> bool {
    self.results.iter().all(|r| r.state.is_ok())
  }

  pub fn get(&self, recipe: &str) -> Option<&BuildResult> {
    self.results.iter().find(|r| r.recipe == recipe)
  }

  pub fn state_of(&self, recipe: &str) -> Option<BuildState> {
    self.get(recipe).map(|r| r.state)
  }

  pub fn counts(&self) -> ReportCounts {
    let mut counts = ReportCounts::default();
    for result in &self.results {
      match result.state {
        BuildState::Succeeded => counts.succeeded += 1,
        BuildState::Cached => counts.cached += 1,
        BuildState::Failed => counts.failed += 1,
        BuildState::Skipped => counts.skipped += 1,
        BuildState::Pending | BuildState::Building => {}
      }
      if result.publish_error.is_some() {
        counts.publish_failures += 1;
      }
    }
    counts
  }
}

/// Which recipes a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
  All,
  /// The named recipes and everything they depend on.
  Targets(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
  pub platform: Platform,
  /// Skip cache lookups. Successful builds are still recorded.
  pub no_cache: bool,
  /// Keep building recipes that do not depend on a failure.
  pub continue_on_error: bool,
  /// Concurrent builds; 1 runs the plan strictly in order.
  pub jobs: usize,
}

impl OrchestratorOptions {
  pub fn new(platform: Platform) -> Self {
    Self {
      platform,
      no_cache: false,
      continue_on_error: false,
      jobs: 1,
    }
  }
}

#[derive(Debug, Error)]
pub enum OrchestrateError {
  #[error(transparent)]
  Load(#[from] LoadError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Lock(#[from] RunLockError),

  #[error("failed to prepare channel: {0}")]
  Channel(#[from] PublishError),
}

#[cfg(test)]
mod tests {
  use super::*;

  fn result(name: &str, state: BuildState) -> BuildResult {
    let mut r = BuildResult::pending(name, "1.0");
    r.state = state;
    r
  }

  #[test]
  fn success_requires_every_recipe_ok() {
    let mut report = BuildReport {
      platform: "linux-64".into(),
      results: vec![result("a", BuildState::Cached), result("b", BuildState::Succeeded)],
      warnings: Vec::new(),
      duration: Duration::ZERO,
    };
    assert!(report.is_success());

    report.results[1].publish_error = Some("disk full".into());
    assert!(report.is_success(), "publish failures only warn");
    assert_eq!(report.counts().publish_failures, 1);

    report.results.push(result("c", BuildState::Skipped));
    assert!(!report.is_success());
  }

  #[test]
  fn reasons_for_failed_and_skipped() {
    let mut r = BuildResult::pending("d", "1.0");
    r.skip(SkipReason::DependencyFailed {
      dependency: "b".into(),
    });
    assert_eq!(r.reason().unwrap(), "dependency 'b' did not build");

    let mut r = BuildResult::pending("b", "1.0");
    r.fail(ExecuteError::Cancelled);
    assert_eq!(r.reason().unwrap(), "build was cancelled");
  }

  #[test]
  fn report_serializes_states_lowercase() {
    let report = BuildReport {
      platform: "linux-64".into(),
      results: vec![result("a", BuildState::Cached)],
      warnings: Vec::new(),
      duration: Duration::from_millis(1500),
    };
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["results"][0]["state"], "cached");
    assert_eq!(json["duration_ms"], 1500);
  }
}
