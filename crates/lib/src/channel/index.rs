//! Per-bucket package index.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::PublishError;
use crate::util::fs::atomic_write;

/// One published archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
  pub name: String,
  pub version: String,
  pub depends: Vec<String>,
  /// Archive file name inside the bucket.
  pub file: String,
  pub sha256: String,
  pub size: u64,
  pub cache_key: String,
  /// Unix seconds at publish time.
  pub timestamp: u64,
}

/// Contents of `<bucket>/index.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelIndex {
  pub subdir: String,
  /// Keyed by archive file name, so republishing a version replaces its record.
  pub packages: BTreeMap<String, PackageRecord>,
}

impl ChannelIndex {
  pub fn empty(subdir: &str) -> Self {
    Self {
      subdir: subdir.to_string(),
      packages: BTreeMap::new(),
    }
  }

  /// Read an index, treating a missing file as empty.
  pub fn read(path: &Path, subdir: &str) -> Result<Self, PublishError> {
    let content = match std::fs::read(path) {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::empty(subdir)),
      Err(source) => {
        return Err(PublishError::Io {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    serde_json::from_slice(&content).map_err(|e| PublishError::Index {
      path: path.to_path_buf(),
      message: e.to_string(),
    })
  }

  /// Replace the index file atomically.
  pub fn write(&self, path: &Path) -> Result<(), PublishError> {
    let json = serde_json::to_vec_pretty(self).map_err(|e| PublishError::Index {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;
    atomic_write(path, &json).map_err(|source| PublishError::Io {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn insert(&mut self, record: PackageRecord) {
    self.packages.insert(record.file.clone(), record);
  }

  pub fn find(&self, name: &str, version: &str) -> Option<&PackageRecord> {
    self.packages.values().find(|r| r.name == name && r.version == version)
  }
}
