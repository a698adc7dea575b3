//! Content-derived cache keys.
//!
//! A [`CacheKey`] is the SHA-256 of the canonical JSON form of a recipe's
//! identity plus its [`Fingerprint`]. Anything that can change the bytes a
//! build produces belongs in the fingerprint; anything that cannot (recipe
//! directory location, dependency order) stays out so moving a checkout does
//! not invalidate the cache.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::SHORT_KEY_LEN;
use crate::platform::Platform;
use crate::recipe::Recipe;
use crate::util::hash::{DirHashError, HashError, Hashable, hash_file};

/// Normalized build inputs that participate in the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
  pub platform: String,
  pub compiler: Option<String>,
  pub compiler_version: Option<String>,
  /// Sorted and deduplicated.
  pub flags: Vec<String>,
  pub extra: BTreeMap<String, String>,
  pub outputs: Vec<PathBuf>,
  /// Content hash of the build script selected for `platform`, if any.
  pub script_hash: Option<String>,
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
  name: &'a str,
  version: &'a str,
  fingerprint: &'a Fingerprint,
}

impl Hashable for KeyMaterial<'_> {}

#[derive(Debug, Error)]
pub enum CacheKeyError {
  #[error("failed to hash build script: {0}")]
  Script(#[from] DirHashError),

  #[error("failed to serialize key material: {0}")]
  Serialize(#[from] HashError),
}

/// Hex SHA-256 identifying one recipe build on one platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(pub String);

impl CacheKey {
  /// Derive the key for building `recipe` on `platform`.
  pub fn derive(recipe: &Recipe, platform: &Platform) -> Result<Self, CacheKeyError> {
    let fingerprint = Fingerprint::of(recipe, platform)?;
    Self::from_parts(&recipe.name, &recipe.version, &fingerprint)
  }

  pub fn from_parts(name: &str, version: &str, fingerprint: &Fingerprint) -> Result<Self, CacheKeyError> {
    let material = KeyMaterial {
      name,
      version,
      fingerprint,
    };
    Ok(Self(material.content_hash()?.0))
  }

  /// Leading characters used in directory names.
  pub fn short(&self) -> &str {
    &self.0[..SHORT_KEY_LEN.min(self.0.len())]
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl Fingerprint {
  pub fn of(recipe: &Recipe, platform: &Platform) -> Result<Self, CacheKeyError> {
    // A missing script makes the build fail before anything is recorded,
    // so hashing it as absent is harmless.
    let script_hash = match recipe.script_for(platform) {
      Some(script) if script.path.is_file() => Some(hash_file(&script.path)?.0),
      _ => None,
    };

    let config = &recipe.configuration;
    Ok(Self {
      platform: if recipe.noarch {
        crate::consts::NOARCH_SUBDIR.to_string()
      } else {
        platform.subdir().to_string()
      },
      compiler: config.compiler.clone(),
      compiler_version: config.compiler_version.clone(),
      flags: config.normalized_flags(),
      extra: config.extra.clone(),
      outputs: recipe.outputs.clone(),
      script_hash,
    })
  }
}
