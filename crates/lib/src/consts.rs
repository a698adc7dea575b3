//! Crate-wide constants.

pub const APP_NAME: &str = "forge";

/// Descriptor file names accepted in a recipe directory. Exactly one may be present.
pub const RECIPE_DESCRIPTORS: &[&str] = &["recipe.yaml", "recipe.yml"];

/// Optional recipe-root file holding default build configuration.
pub const BUILD_CONFIG_FILENAME: &str = "build_config.yaml";

/// Channel bucket for platform-independent artifacts.
pub const NOARCH_SUBDIR: &str = "noarch";

/// Channel index file name, one per bucket.
pub const CHANNEL_INDEX_FILENAME: &str = "index.json";

/// Number of leading hex characters of a cache key used in directory names.
pub const SHORT_KEY_LEN: usize = 12;

/// Lines of child output kept for failure diagnostics.
pub const OUTPUT_TAIL_LINES: usize = 40;

/// January 1, 1980 00:00:00 UTC, for reproducible archive timestamps.
pub const SOURCE_DATE_EPOCH: u64 = 315_532_800;
