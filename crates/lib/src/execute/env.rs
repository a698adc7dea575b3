//! The environment a build script sees.
//!
//! Builds start from an empty environment. Only explicitly passed-through
//! parent variables survive; everything else is derived from the job.

use std::collections::BTreeMap;
use std::path::Path;

use crate::consts::SOURCE_DATE_EPOCH;

use super::types::{BuildJob, ExecutorConfig};

/// Directories prepared for one build.
#[derive(Debug, Clone)]
pub struct BuildDirs<'a> {
  pub work: &'a Path,
  pub tmp: &'a Path,
  pub prefix: &'a Path,
}

/// Assemble the full environment for `job`.
pub fn build_env(job: &BuildJob, config: &ExecutorConfig, dirs: &BuildDirs<'_>) -> BTreeMap<String, String> {
  let mut env = BTreeMap::new();

  for var in &config.passthrough_env {
    if let Some(value) = std::env::var_os(var) {
      env.insert(var.clone(), value.to_string_lossy().into_owned());
    }
  }

  let recipe = &job.recipe;
  let recipe_dir = path_str(&recipe.dir);
  let mut set = |key: &str, value: String| {
    env.insert(key.to_string(), value);
  };

  set("PREFIX", path_str(dirs.prefix));
  set("SRC_DIR", recipe_dir.clone());
  set("RECIPE_DIR", recipe_dir);
  set("BUILD_DIR", path_str(dirs.work));
  set("PKG_NAME", recipe.name.clone());
  set("PKG_VERSION", recipe.version.clone());
  set("TARGET_PLATFORM", job.platform.subdir().to_string());
  set("CPU_COUNT", config.cpu_count.to_string());
  set("MAKEFLAGS", format!("-j{}", config.cpu_count));

  // Isolation
  set("HOME", path_str(dirs.work));
  set("TMPDIR", path_str(dirs.tmp));
  set("TMP", path_str(dirs.tmp));
  set("TEMP", path_str(dirs.tmp));
  set("LANG", "C".to_string());
  set("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH.to_string());

  // Dependencies
  let prefixes: Vec<String> = job.dependencies.iter().map(|d| path_str(&d.prefix)).collect();
  let joined = prefixes.join(list_separator());
  set("DEP_PREFIXES", joined.clone());
  set("CMAKE_PREFIX_PATH", joined);
  for dep in &job.dependencies {
    set(&format!("DEP_{}_PREFIX", env_key(&dep.name)), path_str(&dep.prefix));
  }

  // Configuration
  let config = &recipe.configuration;
  if let Some(compiler) = &config.compiler {
    set("FORGE_COMPILER", compiler.clone());
  }
  if let Some(version) = &config.compiler_version {
    set("FORGE_COMPILER_VERSION", version.clone());
  }
  if !config.flags.is_empty() {
    let flags = config.flags.join(" ");
    set("CFLAGS", flags.clone());
    set("CXXFLAGS", flags);
  }
  for (key, value) in &config.extra {
    set(&format!("FORGE_CFG_{}", env_key(key)), value.clone());
  }

  env
}

/// Uppercase `name` and replace anything outside `[A-Z0-9_]` with `_`.
pub fn env_key(name: &str) -> String {
  name
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() {
        c.to_ascii_uppercase()
      } else {
        '_'
      }
    })
    .collect()
}

fn path_str(path: &Path) -> String {
  path.to_string_lossy().into_owned()
}

#[cfg(windows)]
fn list_separator() -> &'static str {
  ";"
}

#[cfg(not(windows))]
fn list_separator() -> &'static str {
  ":"
}
