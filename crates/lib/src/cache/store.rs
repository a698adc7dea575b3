//! On-disk build cache: one JSON entry per cache key.
//!
//! Entries live at `<root>/entries/<key>.json` and point at an artifact
//! directory elsewhere. Lookups never block: writers go through a temp file
//! and a rename, and are serialized among themselves by a mutex.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::key::CacheKey;
use crate::util::fs::{atomic_write, dir_size, unix_now};
use crate::util::hash::{DirHashError, hash_directory};

const ENTRIES_DIR: &str = "entries";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
  Built,
  Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: CacheKey,
  pub recipe: String,
  pub version: String,
  pub artifact: PathBuf,
  pub status: EntryStatus,
  /// Unix seconds.
  pub created_at: u64,
  /// Directory hash of `artifact` when the entry was recorded.
  pub output_hash: String,
}

/// A cache entry that could not be trusted. Always handled as a miss.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheWarning {
  #[error("cache entry {key} is unreadable: {message}")]
  Unreadable { key: String, message: String },

  #[error("cache entry {key} is corrupt: {message}")]
  Corrupt { key: String, message: String },

  #[error("cache entry {key} records key {found}")]
  KeyMismatch { key: String, found: String },

  #[error("artifact for {recipe} at {artifact} no longer matches its recorded hash")]
  ArtifactModified {
    key: String,
    recipe: String,
    artifact: String,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
  Hit(CacheEntry),
  Miss,
  /// Miss caused by an untrustworthy entry.
  Invalid(CacheWarning),
}

impl CacheLookup {
  pub fn hit(self) -> Option<CacheEntry> {
    match self {
      CacheLookup::Hit(entry) => Some(entry),
      _ => None,
    }
  }
}

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache I/O error at {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to hash artifact: {0}")]
  Hash(#[from] DirHashError),

  #[error("failed to serialize cache entry: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// Summary for `forge cache status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub root: PathBuf,
  pub entries: usize,
  pub built: usize,
  pub stale: usize,
  pub corrupt: usize,
  pub artifact_bytes: u64,
}

#[derive(Debug)]
pub struct BuildCache {
  root: PathBuf,
  write_lock: Mutex<()>,
}

impl BuildCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      write_lock: Mutex::new(()),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn entries_dir(&self) -> PathBuf {
    self.root.join(ENTRIES_DIR)
  }

  fn entry_path(&self, key: &CacheKey) -> PathBuf {
    self.entries_dir().join(format!("{key}.json"))
  }

  /// Look up a built, verified entry for `key`.
  ///
  /// A missing artifact is a quiet miss. Unreadable entries, mismatched keys
  /// and artifacts whose content changed are misses with a warning.
  pub fn lookup(&self, key: &CacheKey) -> CacheLookup {
    let path = self.entry_path(key);
    let entry = match read_entry(&path, key) {
      Ok(Some(entry)) => entry,
      Ok(None) => return CacheLookup::Miss,
      Err(warning) => return self.warn(warning),
    };

    if entry.status == EntryStatus::Stale {
      debug!(recipe = %entry.recipe, key = %key, "cache entry is stale");
      return CacheLookup::Miss;
    }

    if !entry.artifact.is_dir() {
      debug!(recipe = %entry.recipe, artifact = %entry.artifact.display(), "cached artifact is gone");
      return CacheLookup::Miss;
    }

    match hash_directory(&entry.artifact, &[]) {
      Ok(hash) if hash.0 == entry.output_hash => CacheLookup::Hit(entry),
      Ok(_) => self.warn(CacheWarning::ArtifactModified {
        key: key.to_string(),
        recipe: entry.recipe.clone(),
        artifact: entry.artifact.display().to_string(),
      }),
      Err(e) => self.warn(CacheWarning::Unreadable {
        key: key.to_string(),
        message: e.to_string(),
      }),
    }
  }

  fn warn(&self, warning: CacheWarning) -> CacheLookup {
    warn!(cache = %self.root.display(), "{warning}, rebuilding");
    CacheLookup::Invalid(warning)
  }

  /// Record a successful build of `recipe` whose artifact is at `artifact`.
  pub fn record(&self, key: &CacheKey, recipe: &str, version: &str, artifact: &Path) -> Result<CacheEntry, CacheError> {
    let output_hash = hash_directory(artifact, &[])?;
    let entry = CacheEntry {
      key: key.clone(),
      recipe: recipe.to_string(),
      version: version.to_string(),
      artifact: artifact.to_path_buf(),
      status: EntryStatus::Built,
      created_at: unix_now(),
      output_hash: output_hash.0,
    };

    self.write_entry(&entry)?;
    info!(recipe, key = %key.short(), "cache entry recorded");
    Ok(entry)
  }

  /// Mark the entry for `key` stale. Returns whether an entry existed.
  pub fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
    match read_entry(&self.entry_path(key), key) {
      Ok(Some(mut entry)) => {
        entry.status = EntryStatus::Stale;
        self.write_entry(&entry)?;
        debug!(recipe = %entry.recipe, key = %key.short(), "cache entry invalidated");
        Ok(true)
      }
      Ok(None) => Ok(false),
      // Nothing trustworthy to keep; drop it
      Err(_) => self.remove(key),
    }
  }

  /// Mark every entry of `recipe` stale, whatever platform or configuration
  /// produced it. Returns the number of entries touched.
  pub fn invalidate_recipe(&self, recipe: &str) -> Result<usize, CacheError> {
    let mut count = 0;
    for entry in self.list()? {
      if entry.recipe == recipe && entry.status == EntryStatus::Built && self.invalidate(&entry.key)? {
        count += 1;
      }
    }
    Ok(count)
  }

  /// Delete the entry for `key`. The artifact directory is left alone.
  pub fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
    let path = self.entry_path(key);
    let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
    match fs::remove_file(&path) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(source) => Err(CacheError::Io { path, source }),
    }
  }

  /// Delete every entry. Returns the number removed.
  pub fn clear(&self) -> Result<usize, CacheError> {
    let dir = self.entries_dir();
    let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

    let mut removed = 0;
    for path in entry_files(&dir)? {
      fs::remove_file(&path).map_err(|source| CacheError::Io {
        path: path.clone(),
        source,
      })?;
      removed += 1;
    }
    info!(cache = %self.root.display(), removed, "cache cleared");
    Ok(removed)
  }

  /// Every readable entry, sorted by recipe then creation time. Unreadable
  /// entries are skipped with a warning.
  pub fn list(&self) -> Result<Vec<CacheEntry>, CacheError> {
    let mut entries = Vec::new();
    for path in entry_files(&self.entries_dir())? {
      match read_entry_file(&path) {
        Ok(entry) => entries.push(entry),
        Err(message) => warn!(entry = %path.display(), "skipping unreadable cache entry: {message}"),
      }
    }
    entries.sort_by(|a, b| a.recipe.cmp(&b.recipe).then(a.created_at.cmp(&b.created_at)));
    Ok(entries)
  }

  pub fn status(&self) -> Result<CacheStats, CacheError> {
    let files = entry_files(&self.entries_dir())?;
    let mut stats = CacheStats {
      root: self.root.clone(),
      ..Default::default()
    };

    for path in &files {
      match read_entry_file(path) {
        Ok(entry) => {
          stats.entries += 1;
          match entry.status {
            EntryStatus::Built => stats.built += 1,
            EntryStatus::Stale => stats.stale += 1,
          }
          stats.artifact_bytes += dir_size(&entry.artifact);
        }
        Err(_) => stats.corrupt += 1,
      }
    }
    Ok(stats)
  }

  fn write_entry(&self, entry: &CacheEntry) -> Result<(), CacheError> {
    let path = self.entry_path(&entry.key);
    let json = serde_json::to_vec_pretty(entry)?;
    let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
    atomic_write(&path, &json).map_err(|source| CacheError::Io { path, source })
  }
}

/// `Ok(None)` when no entry exists.
fn read_entry(path: &Path, key: &CacheKey) -> Result<Option<CacheEntry>, CacheWarning> {
  let content = match fs::read(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) => {
      return Err(CacheWarning::Unreadable {
        key: key.to_string(),
        message: e.to_string(),
      });
    }
  };

  let entry: CacheEntry = serde_json::from_slice(&content).map_err(|e| CacheWarning::Corrupt {
    key: key.to_string(),
    message: e.to_string(),
  })?;

  if &entry.key != key {
    return Err(CacheWarning::KeyMismatch {
      key: key.to_string(),
      found: entry.key.to_string(),
    });
  }
  Ok(Some(entry))
}

fn read_entry_file(path: &Path) -> Result<CacheEntry, String> {
  let content = fs::read(path).map_err(|e| e.to_string())?;
  serde_json::from_slice(&content).map_err(|e| e.to_string())
}

fn entry_files(dir: &Path) -> Result<Vec<PathBuf>, CacheError> {
  let read = match fs::read_dir(dir) {
    Ok(read) => read,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(source) => {
      return Err(CacheError::Io {
        path: dir.to_path_buf(),
        source,
      });
    }
  };

  let mut files: Vec<PathBuf> = read
    .filter_map(|e| e.ok())
    .map(|e| e.path())
    .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
    .collect();
  files.sort();
  Ok(files)
}
