//! Hashing utilities for cache keys and artifact verification.
//!
//! This module provides:
//! - `Hashable`: SHA-256 over the canonical JSON form of a value
//! - `ContentHash`: a full 64-character hash for content verification
//! - `hash_directory()`: deterministic directory hashing
//! - `hash_file()`: single file hashing
//! - `hash_bytes()`: arbitrary byte hashing

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

pub type HashError = serde_json::Error;

/// Values whose identity is the hash of their serialized form.
///
/// Field order is fixed by the struct definition and maps must be `BTreeMap`s,
/// so the JSON form (and therefore the hash) is stable across runs.
pub trait Hashable: Serialize {
  fn content_hash(&self) -> Result<ContentHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    Ok(hash_bytes(serialized.as_bytes()))
  }
}

/// A full 64-character SHA256 hash.
///
/// The hash is a lowercase hexadecimal string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error during directory hashing.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum DirHashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("failed to read symlink {path}: {message}")]
  ReadSymlink { path: String, message: String },
}

/// Compute a deterministic hash of a directory's contents.
///
/// The hash covers file contents, directory structure and symlink targets,
/// not timestamps or permissions. Entries are sorted by path.
///
/// `exclude` lists file/directory names to skip anywhere in the tree.
pub fn hash_directory(path: &Path, exclude: &[&str]) -> Result<ContentHash, DirHashError> {
  let mut entries: Vec<(String, String)> = Vec::new();

  let walker = WalkDir::new(path).sort_by_file_name().into_iter().filter_entry(|e| {
    e.file_name()
      .to_str()
      .map(|name| !exclude.contains(&name))
      .unwrap_or(true)
  });

  for entry in walker {
    let entry = entry.map_err(|e| DirHashError::WalkDir { message: e.to_string() })?;
    let entry_path = entry.path();

    // Forward slashes so the hash is identical across platforms
    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .replace('\\', "/");

    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let entry_hash = if file_type.is_file() {
      let content_hash = hash_file(entry_path)?;
      format!("F:{}:{}", rel_path, content_hash.0)
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| DirHashError::ReadSymlink {
        path: entry_path.display().to_string(),
        message: e.to_string(),
      })?;
      let target_hash = hash_bytes(target.to_string_lossy().as_bytes());
      format!("L:{}:{}", rel_path, target_hash.0)
    } else {
      continue;
    };

    entries.push((rel_path, entry_hash));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, entry_hash) in entries {
    hasher.update(entry_hash.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let mut file = fs::File::open(path).map_err(|e| DirHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| DirHashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;
  use tempfile::tempdir;

  #[test]
  fn hash_empty_directory() {
    let temp = tempdir().unwrap();
    let hash = hash_directory(temp.path(), &[]).unwrap();
    assert_eq!(hash.0.len(), 64);
  }

  #[test]
  fn hash_is_deterministic() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("a.txt"), "content a").unwrap();
    fs::write(temp.path().join("b.txt"), "content b").unwrap();

    let hash1 = hash_directory(temp.path(), &[]).unwrap();
    let hash2 = hash_directory(temp.path(), &[]).unwrap();

    assert_eq!(hash1, hash2);
  }

  #[test]
  fn hash_changes_with_content() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("file.txt"), "original").unwrap();
    let hash1 = hash_directory(temp.path(), &[]).unwrap();

    fs::write(temp.path().join("file.txt"), "modified").unwrap();
    let hash2 = hash_directory(temp.path(), &[]).unwrap();

    assert_ne!(hash1, hash2);
  }

  #[test]
  fn hash_respects_exclusions() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("file.txt"), "content").unwrap();
    let hash1 = hash_directory(temp.path(), &[]).unwrap();

    fs::create_dir(temp.path().join("tmp")).unwrap();
    fs::write(temp.path().join("tmp/scratch"), "temp").unwrap();

    let hash2 = hash_directory(temp.path(), &["tmp"]).unwrap();
    assert_eq!(hash1, hash2);
  }

  #[test]
  fn same_content_different_structure_different_hash() {
    let temp1 = tempdir().unwrap();
    fs::write(temp1.path().join("file.txt"), "content").unwrap();

    let temp2 = tempdir().unwrap();
    fs::create_dir(temp2.path().join("subdir")).unwrap();
    fs::write(temp2.path().join("subdir/file.txt"), "content").unwrap();

    let hash1 = hash_directory(temp1.path(), &[]).unwrap();
    let hash2 = hash_directory(temp2.path(), &[]).unwrap();

    assert_ne!(hash1, hash2);
  }

  #[test]
  fn missing_directory_is_an_error() {
    let temp = tempdir().unwrap();
    let result = hash_directory(&temp.path().join("nope"), &[]);
    assert!(matches!(result, Err(DirHashError::WalkDir { .. })));
  }

  #[derive(Serialize)]
  struct Sample {
    name: String,
    tags: BTreeMap<String, String>,
  }

  impl Hashable for Sample {}

  #[test]
  fn hashable_is_insertion_order_independent() {
    let mut a = BTreeMap::new();
    a.insert("x".to_string(), "1".to_string());
    a.insert("y".to_string(), "2".to_string());

    let mut b = BTreeMap::new();
    b.insert("y".to_string(), "2".to_string());
    b.insert("x".to_string(), "1".to_string());

    let first = Sample { name: "zlib".to_string(), tags: a }.content_hash().unwrap();
    let second = Sample { name: "zlib".to_string(), tags: b }.content_hash().unwrap();
    assert_eq!(first, second);
  }
}
