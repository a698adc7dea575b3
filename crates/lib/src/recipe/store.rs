//! Recipe discovery and descriptor parsing.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use super::graph::BuildGraph;
use super::types::{LoadError, Recipe, RecipeConfig};
use crate::consts::{BUILD_CONFIG_FILENAME, RECIPE_DESCRIPTORS};
use crate::execute::env::env_key;

/// On-disk shape of a recipe descriptor before validation.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Descriptor {
  name: Option<String>,
  version: Option<Value>,
  #[serde(default)]
  dependencies: Vec<String>,
  #[serde(default)]
  noarch: bool,
  #[serde(default)]
  build: BTreeMap<String, PathBuf>,
  #[serde(default)]
  configuration: Option<Mapping>,
  #[serde(default)]
  outputs: Vec<PathBuf>,
}

/// Load every recipe below `root` into a validated [`BuildGraph`].
///
/// Each non-hidden immediate subdirectory holding exactly one descriptor is a
/// recipe. Directories without a descriptor are skipped with a warning.
/// Defaults from `build_config.yaml` are merged under each recipe's
/// configuration.
pub fn load(root: &Path) -> Result<BuildGraph, LoadError> {
  if !root.is_dir() {
    return Err(LoadError::RootNotFound(root.to_path_buf()));
  }
  // Scripts run from their own work directory, so recipe paths must be absolute
  let root = &dunce::canonicalize(root).map_err(|source| LoadError::Read {
    path: root.to_path_buf(),
    source,
  })?;

  let defaults = load_defaults(root)?;
  let mut recipes = Vec::new();

  for dir in recipe_dirs(root)? {
    let Some(descriptor) = find_descriptor(&dir)? else {
      warn!(dir = %dir.display(), "directory has no recipe descriptor, skipping");
      continue;
    };

    let mut recipe = parse_descriptor(&descriptor)?;
    recipe.configuration = recipe.configuration.merged_over(&defaults);
    check_extra_keys(&descriptor, &recipe.configuration)?;
    debug!(recipe = %recipe.name, version = %recipe.version, "loaded recipe");
    recipes.push(recipe);
  }

  check_name_keys(&recipes)?;
  let graph = BuildGraph::from_recipes(recipes)?;
  info!(root = %root.display(), count = graph.len(), "recipes loaded");
  Ok(graph)
}

/// Read the recipe-root default configuration, or an empty one if absent.
pub fn load_defaults(root: &Path) -> Result<RecipeConfig, LoadError> {
  let path = root.join(BUILD_CONFIG_FILENAME);
  if !path.is_file() {
    return Ok(RecipeConfig::default());
  }

  let value = read_yaml(&path)?;
  match value {
    Value::Null => Ok(RecipeConfig::default()),
    Value::Mapping(map) => parse_configuration(&path, &map),
    _ => Err(LoadError::Invalid {
      path,
      field: "configuration".to_string(),
      message: "expected a mapping".to_string(),
    }),
  }
}

/// Parse one descriptor file. The recipe directory is the descriptor's parent.
pub fn parse_descriptor(path: &Path) -> Result<Recipe, LoadError> {
  let value = match read_yaml(path)? {
    // An empty file is a descriptor with no fields
    Value::Null => Value::Mapping(Mapping::new()),
    other => other,
  };

  let descriptor: Descriptor = serde_yaml::from_value(value).map_err(|e| LoadError::Parse {
    path: path.to_path_buf(),
    message: e.to_string(),
  })?;

  let name = descriptor.name.ok_or_else(|| LoadError::MissingField {
    path: path.to_path_buf(),
    field: "name",
  })?;
  validate_name(path, &name)?;

  let version = match descriptor.version {
    None | Some(Value::Null) => {
      return Err(LoadError::MissingField {
        path: path.to_path_buf(),
        field: "version",
      });
    }
    Some(value) => scalar_to_string(&value)
      .filter(|v| !v.trim().is_empty())
      .ok_or_else(|| invalid(path, "version", "expected a non-empty scalar"))?,
  };

  let mut seen = HashSet::new();
  let mut dependencies = Vec::with_capacity(descriptor.dependencies.len());
  for dep in descriptor.dependencies {
    if dep.trim().is_empty() {
      return Err(invalid(path, "dependencies", "dependency names must not be empty"));
    }
    if seen.insert(dep.clone()) {
      dependencies.push(dep);
    }
  }

  for (key, script) in &descriptor.build {
    if script.as_os_str().is_empty() {
      return Err(invalid(path, "build", &format!("script for '{key}' is empty")));
    }
  }

  let configuration = match descriptor.configuration {
    Some(map) => parse_configuration(path, &map)?,
    None => RecipeConfig::default(),
  };

  let dir = path
    .parent()
    .map(Path::to_path_buf)
    .unwrap_or_else(|| PathBuf::from("."));

  Ok(Recipe {
    name,
    version,
    dependencies,
    build_steps: descriptor.build,
    configuration,
    outputs: descriptor.outputs,
    noarch: descriptor.noarch,
    dir,
  })
}

/// Non-hidden immediate subdirectories of `root`, sorted by name.
fn recipe_dirs(root: &Path) -> Result<Vec<PathBuf>, LoadError> {
  let entries = fs::read_dir(root).map_err(|source| LoadError::Read {
    path: root.to_path_buf(),
    source,
  })?;

  let mut dirs = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|source| LoadError::Read {
      path: root.to_path_buf(),
      source,
    })?;
    let hidden = entry.file_name().to_string_lossy().starts_with('.');
    if !hidden && entry.path().is_dir() {
      dirs.push(entry.path());
    }
  }
  dirs.sort();
  Ok(dirs)
}

fn find_descriptor(dir: &Path) -> Result<Option<PathBuf>, LoadError> {
  let found: Vec<&str> = RECIPE_DESCRIPTORS
    .iter()
    .copied()
    .filter(|name| dir.join(name).is_file())
    .collect();

  match found.as_slice() {
    [] => Ok(None),
    [single] => Ok(Some(dir.join(single))),
    _ => Err(LoadError::AmbiguousDescriptor {
      dir: dir.to_path_buf(),
      found: found.join(", "),
    }),
  }
}

fn read_yaml(path: &Path) -> Result<Value, LoadError> {
  let content = fs::read_to_string(path).map_err(|source| LoadError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  serde_yaml::from_str(&content).map_err(|e| LoadError::Parse {
    path: path.to_path_buf(),
    message: e.to_string(),
  })
}

/// Names end up in file names, environment variable names and archive names.
fn validate_name(path: &Path, name: &str) -> Result<(), LoadError> {
  if name.is_empty() {
    return Err(invalid(path, "name", "must not be empty"));
  }
  if name.starts_with('.') || name.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\') {
    return Err(invalid(
      path,
      "name",
      &format!("'{name}' may not start with '.' or contain whitespace or path separators"),
    ));
  }
  Ok(())
}

/// Recipe names become `DEP_<NAME>_PREFIX`; two names may not map to the
/// same variable. Exact duplicates are left to the graph.
fn check_name_keys(recipes: &[Recipe]) -> Result<(), LoadError> {
  let mut seen: BTreeMap<String, &Recipe> = BTreeMap::new();
  for recipe in recipes {
    let key = env_key(&recipe.name);
    match seen.get(&key) {
      Some(first) if first.name != recipe.name => {
        return Err(LoadError::EnvNameCollision {
          first: first.name.clone(),
          second: recipe.name.clone(),
          variable: format!("DEP_{key}_PREFIX"),
        });
      }
      Some(_) => {}
      None => {
        seen.insert(key, recipe);
      }
    }
  }
  Ok(())
}

/// Extension keys become `FORGE_CFG_<KEY>`, checked after defaults are merged.
fn check_extra_keys(path: &Path, config: &RecipeConfig) -> Result<(), LoadError> {
  let mut seen: BTreeMap<String, &str> = BTreeMap::new();
  for key in config.extra.keys() {
    if let Some(first) = seen.insert(env_key(key), key) {
      return Err(invalid(
        path,
        "configuration",
        &format!("keys '{first}' and '{key}' both map to FORGE_CFG_{}", env_key(key)),
      ));
    }
  }
  Ok(())
}

fn parse_configuration(path: &Path, map: &Mapping) -> Result<RecipeConfig, LoadError> {
  let mut config = RecipeConfig::default();

  for (key, value) in map {
    let key = key
      .as_str()
      .ok_or_else(|| invalid(path, "configuration", "keys must be strings"))?;

    match key {
      "compiler" => config.compiler = optional_scalar(path, key, value)?,
      "compiler_version" => config.compiler_version = optional_scalar(path, key, value)?,
      "flags" => config.flags = parse_flags(path, value)?,
      _ => {
        let value = scalar_to_string(value).ok_or_else(|| {
          invalid(
            path,
            &format!("configuration.{key}"),
            "extension values must be strings, numbers or booleans",
          )
        })?;
        config.extra.insert(key.to_string(), value);
      }
    }
  }

  Ok(config)
}

fn optional_scalar(path: &Path, key: &str, value: &Value) -> Result<Option<String>, LoadError> {
  if value.is_null() {
    return Ok(None);
  }
  scalar_to_string(value)
    .map(Some)
    .ok_or_else(|| invalid(path, &format!("configuration.{key}"), "expected a scalar"))
}

/// Flags are either a list of strings or one whitespace-separated string.
fn parse_flags(path: &Path, value: &Value) -> Result<Vec<String>, LoadError> {
  let field = "configuration.flags";
  match value {
    Value::Null => Ok(Vec::new()),
    Value::String(s) => Ok(s.split_whitespace().map(str::to_string).collect()),
    Value::Sequence(items) => items
      .iter()
      .map(|item| match item.as_str() {
        Some(flag) if !flag.trim().is_empty() => Ok(flag.to_string()),
        _ => Err(invalid(path, field, "each flag must be a non-empty string")),
      })
      .collect(),
    _ => Err(invalid(path, field, "expected a list of strings")),
  }
}

fn scalar_to_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

fn invalid(path: &Path, field: &str, message: &str) -> LoadError {
  LoadError::Invalid {
    path: path.to_path_buf(),
    field: field.to_string(),
    message: message.to_string(),
  }
}
