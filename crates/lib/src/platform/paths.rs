//! Default locations for forge's working directories.
//!
//! Every directory can be redirected with an environment variable, which is
//! how the CLI and the tests point forge at scratch locations.

use std::path::{Path, PathBuf};

use crate::consts::APP_NAME;

/// Environment variable overriding the recipe root.
pub const RECIPES_ENV: &str = "FORGE_RECIPES";
/// Environment variable overriding the artifact staging root.
pub const OUTPUT_ENV: &str = "FORGE_OUTPUT";
/// Environment variable overriding the build cache root.
pub const CACHE_ENV: &str = "FORGE_CACHE_DIR";
/// Environment variable overriding the channel root.
pub const CHANNEL_ENV: &str = "FORGE_CHANNEL_DIR";

fn env_path(var: &str) -> Option<PathBuf> {
  std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Returns the user's home directory, or the current directory if it cannot be determined.
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  env_path("USERPROFILE").unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the user's home directory, or the current directory if it cannot be determined.
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  env_path("HOME").unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  env_path("APPDATA").unwrap_or_else(home_dir).join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = env_path("XDG_DATA_HOME").unwrap_or_else(|| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  env_path("LOCALAPPDATA")
    .unwrap_or_else(home_dir)
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  let cache_home = env_path("XDG_CACHE_HOME").unwrap_or_else(|| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Recipe root: `$FORGE_RECIPES`, else `./recipes`.
pub fn recipes_dir() -> PathBuf {
  env_path(RECIPES_ENV).unwrap_or_else(|| PathBuf::from("recipes"))
}

/// Artifact staging root: `$FORGE_OUTPUT`, else `<data dir>/builds`.
pub fn output_dir() -> PathBuf {
  env_path(OUTPUT_ENV).unwrap_or_else(|| data_dir().join("builds"))
}

/// Build cache root: `$FORGE_CACHE_DIR`, else the platform cache directory.
pub fn build_cache_dir() -> PathBuf {
  env_path(CACHE_ENV).unwrap_or_else(cache_dir)
}

/// Channel root: `$FORGE_CHANNEL_DIR`, else `<output>/channel`.
pub fn channel_dir(output: &Path) -> PathBuf {
  env_path(CHANNEL_ENV).unwrap_or_else(|| output.join("channel"))
}
