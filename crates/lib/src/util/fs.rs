//! Filesystem helpers shared by the cache and the channel.

use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Write `contents` to `path` so readers see either the old file or the new one.
///
/// The data goes to a uniquely named temp file in the same directory, is
/// flushed, and is then renamed over the destination.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
  let dir = path
    .parent()
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"))?;
  std::fs::create_dir_all(dir)?;

  let mut tmp = NamedTempFile::new_in(dir)?;
  tmp.write_all(contents)?;
  tmp.as_file().sync_all()?;
  tmp.persist(path).map_err(|e| e.error)?;
  Ok(())
}

/// Total size in bytes of regular files below `path`. Missing paths count as zero.
pub fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn atomic_write_creates_parent_and_replaces() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("index.json");

    atomic_write(&path, b"first").unwrap();
    atomic_write(&path, b"second").unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
    let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
    assert_eq!(leftovers.len(), 1, "temp files must not be left behind");
  }

  #[test]
  fn dir_size_sums_nested_files() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir(temp.path().join("lib")).unwrap();
    std::fs::write(temp.path().join("a"), [0u8; 10]).unwrap();
    std::fs::write(temp.path().join("lib/b"), [0u8; 5]).unwrap();

    assert_eq!(dir_size(temp.path()), 15);
    assert_eq!(dir_size(&temp.path().join("missing")), 0);
  }
}
