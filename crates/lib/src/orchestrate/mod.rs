//! Drive a full run: resolve a plan, consult the cache, build what is
//! missing, record and publish results.
//!
//! With `jobs == 1` recipes run strictly in plan order. With more, each
//! dependency-depth wave runs concurrently under a semaphore; a recipe is only
//! dispatched once every dependency reached a terminal state. Builds still
//! queued on the semaphore when the run stops are skipped, never started.

mod types;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{BuildCache, CacheKey, CacheLookup, CacheWarning};
use crate::channel::ChannelPublisher;
use crate::execute::{BuildJob, DependencyPrefix, ExecuteError, ExecutionOutcome, Executor};
use crate::recipe::{self, BuildGraph, Recipe};
use crate::resolve::{self, BuildPlan};
use crate::run_lock::RunLock;

pub use types::{
  BuildReport, BuildResult, BuildState, OrchestrateError, OrchestratorOptions, ReportCounts, Selection, SkipReason,
};

pub struct Orchestrator<E> {
  graph: BuildGraph,
  cache: BuildCache,
  channel: ChannelPublisher,
  executor: Arc<E>,
  options: OrchestratorOptions,
}

impl<E: Executor + 'static> Orchestrator<E> {
  pub fn new(
    graph: BuildGraph,
    cache: BuildCache,
    channel: ChannelPublisher,
    executor: E,
    options: OrchestratorOptions,
  ) -> Self {
    Self {
      graph,
      cache,
      channel,
      executor: Arc::new(executor),
      options,
    }
  }

  /// Load the recipe tree at `recipes` and build an orchestrator over it.
  pub fn load(
    recipes: &Path,
    cache: BuildCache,
    channel: ChannelPublisher,
    executor: E,
    options: OrchestratorOptions,
  ) -> Result<Self, OrchestrateError> {
    let graph = recipe::load(recipes)?;
    Ok(Self::new(graph, cache, channel, executor, options))
  }

  pub fn graph(&self) -> &BuildGraph {
    &self.graph
  }

  pub fn cache(&self) -> &BuildCache {
    &self.cache
  }

  pub fn channel(&self) -> &ChannelPublisher {
    &self.channel
  }

  pub fn executor(&self) -> &E {
    &self.executor
  }

  pub fn options(&self) -> &OrchestratorOptions {
    &self.options
  }

  /// Take the run lock on the cache and channel roots.
  pub fn lock(&self, command: &str) -> Result<RunLock, OrchestrateError> {
    Ok(RunLock::acquire(&[self.cache.root(), self.channel.root()], command)?)
  }

  pub fn plan(&self, selection: &Selection) -> Result<BuildPlan, OrchestrateError> {
    let plan = match selection {
      Selection::All => resolve::order(&self.graph).map_err(resolve::ResolveError::from)?,
      Selection::Targets(targets) => resolve::subset(&self.graph, targets)?,
    };
    Ok(plan)
  }

  /// Build everything `selection` covers. Recipe failures land in the
  /// report; only problems with the run as a whole are errors.
  pub async fn run(&self, selection: &Selection, cancel: CancellationToken) -> Result<BuildReport, OrchestrateError> {
    let started = Instant::now();
    let plan = self.plan(selection)?;
    self.channel.init()?;

    info!(
      recipes = plan.len(),
      platform = %self.options.platform,
      jobs = self.options.jobs,
      "starting build"
    );

    let mut state = RunState::new(&self.graph, &plan);
    if self.options.jobs <= 1 {
      self.run_sequential(&plan, &mut state, &cancel).await;
    } else {
      self.run_waves(&plan, &mut state, &cancel).await;
    }

    let report = BuildReport {
      platform: self.options.platform.subdir().to_string(),
      results: state.results,
      warnings: state.warnings,
      duration: started.elapsed(),
    };
    let counts = report.counts();
    info!(
      succeeded = counts.succeeded,
      cached = counts.cached,
      failed = counts.failed,
      skipped = counts.skipped,
      "build finished"
    );
    Ok(report)
  }

  async fn run_sequential(&self, plan: &BuildPlan, state: &mut RunState, cancel: &CancellationToken) {
    for name in plan.iter() {
      if cancel.is_cancelled() {
        state.skip_pending(SkipReason::Cancelled);
        break;
      }

      let Some(job) = self.prepare(name, state) else {
        continue;
      };
      let outcome = self.executor.execute(job, cancel.clone()).await;
      let ok = self.complete(name, outcome, state);

      if cancel.is_cancelled() {
        state.skip_pending(SkipReason::Cancelled);
        break;
      }
      if !ok && !self.options.continue_on_error {
        state.skip_pending(SkipReason::Aborted);
        break;
      }
    }
  }

  async fn run_waves(&self, plan: &BuildPlan, state: &mut RunState, cancel: &CancellationToken) {
    let waves = resolve::waves(&self.graph, plan);
    let semaphore = Arc::new(Semaphore::new(self.options.jobs));
    let halted = Arc::new(AtomicBool::new(false));
    let stop_on_failure = !self.options.continue_on_error;

    for (wave_idx, wave) in waves.iter().enumerate() {
      if cancel.is_cancelled() {
        state.skip_pending(SkipReason::Cancelled);
        break;
      }

      let mut join_set: JoinSet<(String, Result<ExecutionOutcome, SkipReason>)> = JoinSet::new();
      for name in wave {
        let Some(job) = self.prepare(name, state) else {
          continue;
        };
        let executor = Arc::clone(&self.executor);
        let semaphore = Arc::clone(&semaphore);
        let halted = Arc::clone(&halted);
        let cancel = cancel.clone();
        let name = name.clone();

        join_set.spawn(async move {
          // The semaphore is never closed
          let permit = semaphore.acquire_owned().await.ok();
          if cancel.is_cancelled() {
            return (name, Err(SkipReason::Cancelled));
          }
          if halted.load(Ordering::SeqCst) {
            return (name, Err(SkipReason::Aborted));
          }

          let outcome = executor.execute(job, cancel).await;
          // Raised before the permit goes back so the next waiter sees it
          if stop_on_failure && !outcome.is_success() {
            halted.store(true, Ordering::SeqCst);
          }
          drop(permit);
          (name, Ok(outcome))
        });
      }
      debug!(wave = wave_idx, dispatched = join_set.len(), "wave dispatched");

      let mut failed = false;
      while let Some(joined) = join_set.join_next().await {
        match joined {
          Ok((name, Ok(outcome))) => failed |= !self.complete(&name, outcome, state),
          Ok((name, Err(reason))) => {
            debug!(recipe = %name, reason = %reason, "not started");
            if let Some(result) = state.get_mut(&name) {
              result.skip(reason);
            }
          }
          Err(e) => {
            error!(error = %e, "build task panicked");
            failed = true;
          }
        }
      }
      // A panicked task leaves its recipe Building
      state.fail_building(|| ExecuteError::Io {
        message: "build task panicked".to_string(),
      });

      if cancel.is_cancelled() {
        state.skip_pending(SkipReason::Cancelled);
        break;
      }
      if failed && !self.options.continue_on_error {
        state.skip_pending(SkipReason::Aborted);
        break;
      }
    }
  }

  /// Settle everything that can be decided without running the build.
  /// Returns a job only when the recipe has to be built.
  fn prepare(&self, name: &str, state: &mut RunState) -> Option<BuildJob> {
    let recipe = self.graph.get(name)?;
    let platform = &self.options.platform;

    if let Some(dependency) = recipe
      .dependencies
      .iter()
      .find(|dep| !state.get(dep).is_some_and(|r| r.state.is_ok()))
    {
      info!(recipe = %name, dependency = %dependency, "skipping, dependency did not build");
      state.get_mut(name)?.skip(SkipReason::DependencyFailed {
        dependency: dependency.clone(),
      });
      return None;
    }

    let key = match CacheKey::derive(recipe, platform) {
      Ok(key) => key,
      Err(e) => {
        error!(recipe = %name, error = %e, "failed to compute cache key");
        state.get_mut(name)?.fail(ExecuteError::Io { message: e.to_string() });
        return None;
      }
    };
    state.get_mut(name)?.cache_key = Some(key.to_string());

    if !self.options.no_cache {
      match self.cache.lookup(&key) {
        CacheLookup::Hit(entry) => {
          info!(recipe = %name, key = %key.short(), "cached");
          let published = self.ensure_published(recipe, &key, &entry.artifact);
          let result = state.get_mut(name)?;
          result.state = BuildState::Cached;
          result.artifact = Some(entry.artifact);
          apply_publish(result, published);
          return None;
        }
        CacheLookup::Invalid(warning) => state.warnings.push(warning),
        CacheLookup::Miss => {}
      }
    }

    // Each artifact is its own prefix, so indirect dependencies are passed too
    let dependencies: Vec<DependencyPrefix> = self
      .graph
      .dependency_closure(name)
      .into_iter()
      .filter_map(|dep| {
        let prefix = state.get(dep)?.artifact.clone()?;
        Some(DependencyPrefix {
          name: dep.to_string(),
          prefix,
        })
      })
      .collect();

    info!(recipe = %name, key = %key.short(), "building");
    state.get_mut(name)?.state = BuildState::Building;
    Some(BuildJob {
      recipe: recipe.clone(),
      key,
      platform: *platform,
      dependencies,
    })
  }

  /// Fold an executor outcome into the run. Returns whether the build
  /// succeeded.
  fn complete(&self, name: &str, outcome: ExecutionOutcome, state: &mut RunState) -> bool {
    let Some(recipe) = self.graph.get(name) else {
      return false;
    };
    let Some(result) = state.get_mut(name) else {
      return false;
    };
    result.duration = outcome.duration;
    result.log_path = outcome.log_path;
    result.tail = outcome.tail;

    match outcome.result {
      Ok(artifact) => {
        let key = CacheKey(result.cache_key.clone().unwrap_or_default());
        if let Err(e) = self.cache.record(&key, &recipe.name, &recipe.version, &artifact) {
          warn!(recipe = %name, error = %e, "failed to record cache entry");
        }
        let published = self.publish(recipe, &key, &artifact);

        result.state = BuildState::Succeeded;
        result.artifact = Some(artifact);
        apply_publish(result, published);
        debug!(recipe = %name, "build recorded");
        true
      }
      Err(e) => {
        debug!(recipe = %name, error = %e, "recipe failed");
        result.fail(e);
        false
      }
    }
  }

  /// Publish a cached artifact unless the channel already carries it under
  /// the same cache key.
  fn ensure_published(&self, recipe: &Recipe, key: &CacheKey, artifact: &Path) -> Result<String, String> {
    let bucket = ChannelPublisher::bucket_for(recipe, &self.options.platform);
    let current = key.to_string();
    if self.channel.published_key(bucket, &recipe.name, &recipe.version).as_ref() == Some(&current) {
      return Ok(bucket.to_string());
    }
    self.publish(recipe, key, artifact)
  }

  /// Publish `artifact`, replacing whatever the channel holds for this version.
  fn publish(&self, recipe: &Recipe, key: &CacheKey, artifact: &Path) -> Result<String, String> {
    match self.channel.publish(recipe, &self.options.platform, artifact, key) {
      Ok(published) => Ok(published.bucket),
      Err(e) => {
        warn!(recipe = %recipe.name, error = %e, "publish failed");
        Err(e.to_string())
      }
    }
  }
}

fn apply_publish(result: &mut BuildResult, published: Result<String, String>) {
  match published {
    Ok(bucket) => result.published = Some(bucket),
    Err(message) => result.publish_error = Some(message),
  }
}

/// Results in plan order plus a name index into them.
struct RunState {
  results: Vec<BuildResult>,
  positions: HashMap<String, usize>,
  warnings: Vec<CacheWarning>,
}

impl RunState {
  fn new(graph: &BuildGraph, plan: &BuildPlan) -> Self {
    let results: Vec<BuildResult> = plan
      .iter()
      .map(|name| {
        let version = graph.get(name).map(|r| r.version.as_str()).unwrap_or_default();
        BuildResult::pending(name, version)
      })
      .collect();
    let positions = plan
      .iter()
      .enumerate()
      .map(|(pos, name)| (name.to_string(), pos))
      .collect();

    Self {
      results,
      positions,
      warnings: Vec::new(),
    }
  }

  fn get(&self, name: &str) -> Option<&BuildResult> {
    self.positions.get(name).map(|&pos| &self.results[pos])
  }

  fn get_mut(&mut self, name: &str) -> Option<&mut BuildResult> {
    self.positions.get(name).map(|&pos| &mut self.results[pos])
  }

  fn skip_pending(&mut self, reason: SkipReason) {
    for result in self.results.iter_mut().filter(|r| r.state == BuildState::Pending) {
      debug!(recipe = %result.recipe, reason = %reason, "skipped");
      result.skip(reason.clone());
    }
  }

  fn fail_building(&mut self, error: impl Fn() -> ExecuteError) {
    for result in self.results.iter_mut().filter(|r| r.state == BuildState::Building) {
      result.fail(error());
    }
  }
}
