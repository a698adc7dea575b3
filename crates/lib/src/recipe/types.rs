use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::Platform;

/// A buildable package: identity, dependencies, and how to build it per platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipe {
  pub name: String,
  pub version: String,
  /// Declared dependencies, in declaration order, without duplicates.
  pub dependencies: Vec<String>,
  /// Platform key -> build script, relative to `dir`.
  pub build_steps: BTreeMap<String, PathBuf>,
  pub configuration: RecipeConfig,
  /// Paths relative to the install prefix that a successful build must produce.
  pub outputs: Vec<PathBuf>,
  /// Published into the platform-independent channel bucket.
  pub noarch: bool,
  /// The recipe directory; doubles as the build's source directory.
  pub dir: PathBuf,
}

/// Typed build configuration with an open extension map.
///
/// `extra` holds every key without a dedicated field. Values are stored as
/// strings since they only ever reach build scripts as environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeConfig {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub compiler: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub compiler_version: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub flags: Vec<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub extra: BTreeMap<String, String>,
}

/// The build script selected for a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRef {
  /// The `build` key that matched.
  pub key: String,
  /// Absolute path of the script.
  pub path: PathBuf,
}

/// Errors raised while loading recipes. All of them abort the run before any build.
#[derive(Debug, Error)]
pub enum LoadError {
  #[error("recipe root not found: {}", .0.display())]
  RootNotFound(PathBuf),

  #[error("failed to read {}: {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {}: {message}", .path.display())]
  Parse { path: PathBuf, message: String },

  #[error("{}: missing required field '{field}'", .path.display())]
  MissingField { path: PathBuf, field: &'static str },

  #[error("{}: invalid {field}: {message}", .path.display())]
  Invalid {
    path: PathBuf,
    field: String,
    message: String,
  },

  #[error("{}: found multiple recipe descriptors ({found})", .dir.display())]
  AmbiguousDescriptor { dir: PathBuf, found: String },

  #[error("duplicate recipe '{name}' defined in {} and {}", .first.display(), .second.display())]
  DuplicateRecipe {
    name: String,
    first: PathBuf,
    second: PathBuf,
  },

  #[error("recipe '{name}' depends on itself")]
  SelfDependency { name: String },

  #[error("recipe '{recipe}' depends on unknown recipe '{dependency}'")]
  UnknownDependency { recipe: String, dependency: String },

  #[error("recipes '{first}' and '{second}' would both be exported as {variable}")]
  EnvNameCollision {
    first: String,
    second: String,
    variable: String,
  },
}

impl Recipe {
  /// Create a recipe with no dependencies, scripts or configuration.
  pub fn new(name: impl Into<String>, version: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
      dependencies: Vec::new(),
      build_steps: BTreeMap::new(),
      configuration: RecipeConfig::default(),
      outputs: Vec::new(),
      noarch: false,
      dir: dir.into(),
    }
  }

  pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.dependencies = deps.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_script(mut self, key: impl Into<String>, script: impl Into<PathBuf>) -> Self {
    self.build_steps.insert(key.into(), script.into());
    self
  }

  pub fn with_configuration(mut self, configuration: RecipeConfig) -> Self {
    self.configuration = configuration;
    self
  }

  /// Pick the build script for `platform`.
  ///
  /// Keys are tried from most to least specific: channel subdir, OS, OS
  /// family, then `any`. Keys naming other platforms are ignored.
  pub fn script_for(&self, platform: &Platform) -> Option<ScriptRef> {
    platform.script_keys().into_iter().find_map(|key| {
      self.build_steps.get(key).map(|script| ScriptRef {
        key: key.to_string(),
        path: self.dir.join(script),
      })
    })
  }

  /// Human-readable `name-version`.
  pub fn label(&self) -> String {
    format!("{}-{}", self.name, self.version)
  }
}

impl RecipeConfig {
  /// Overlay `self` on top of `defaults`: scalar fields and non-empty flag
  /// lists from the recipe win, extension keys are merged key by key.
  pub fn merged_over(&self, defaults: &RecipeConfig) -> RecipeConfig {
    let mut extra = defaults.extra.clone();
    extra.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));

    RecipeConfig {
      compiler: self.compiler.clone().or_else(|| defaults.compiler.clone()),
      compiler_version: self
        .compiler_version
        .clone()
        .or_else(|| defaults.compiler_version.clone()),
      flags: if self.flags.is_empty() {
        defaults.flags.clone()
      } else {
        self.flags.clone()
      },
      extra,
    }
  }

  /// Flags in canonical form: sorted and deduplicated.
  pub fn normalized_flags(&self) -> Vec<String> {
    let mut flags = self.flags.clone();
    flags.sort();
    flags.dedup();
    flags
  }
}
