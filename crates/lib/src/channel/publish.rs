use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::PublishError;
use super::index::{ChannelIndex, PackageRecord};
use crate::cache::CacheKey;
use crate::consts::{CHANNEL_INDEX_FILENAME, NOARCH_SUBDIR};
use crate::platform::Platform;
use crate::recipe::Recipe;
use crate::util::fs::unix_now;
use crate::util::hash::hash_file;

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedPackage {
  pub bucket: String,
  pub archive: PathBuf,
  pub record: PackageRecord,
}

#[derive(Debug)]
pub struct ChannelPublisher {
  root: PathBuf,
  index_lock: Mutex<()>,
}

impl ChannelPublisher {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      index_lock: Mutex::new(()),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Bucket a recipe publishes into on `platform`.
  pub fn bucket_for(recipe: &Recipe, platform: &Platform) -> &'static str {
    if recipe.noarch { NOARCH_SUBDIR } else { platform.subdir() }
  }

  /// Create every bucket with an empty index; existing indexes are kept.
  pub fn init(&self) -> Result<(), PublishError> {
    let _guard = self.index_lock.lock().unwrap_or_else(|e| e.into_inner());
    for bucket in Platform::all_buckets() {
      let index_path = self.index_path(bucket);
      if !index_path.exists() {
        ChannelIndex::empty(bucket).write(&index_path)?;
      }
    }
    debug!(channel = %self.root.display(), "channel initialized");
    Ok(())
  }

  /// Archive `artifact` into the recipe's bucket and add it to the index.
  pub fn publish(
    &self,
    recipe: &Recipe,
    platform: &Platform,
    artifact: &Path,
    key: &CacheKey,
  ) -> Result<PublishedPackage, PublishError> {
    if !artifact.is_dir() {
      return Err(PublishError::MissingArtifact(artifact.to_path_buf()));
    }

    let bucket = Self::bucket_for(recipe, platform);
    let bucket_dir = self.root.join(bucket);
    std::fs::create_dir_all(&bucket_dir).map_err(|source| PublishError::Io {
      path: bucket_dir.clone(),
      source,
    })?;

    let file = format!("{}-{}.tar.gz", recipe.name, recipe.version);
    let archive = bucket_dir.join(&file);
    write_archive(artifact, &archive)?;

    let sha256 = hash_file(&archive)?.0;
    let size = std::fs::metadata(&archive)
      .map_err(|source| PublishError::Io {
        path: archive.clone(),
        source,
      })?
      .len();

    let record = PackageRecord {
      name: recipe.name.clone(),
      version: recipe.version.clone(),
      depends: recipe.dependencies.clone(),
      file,
      sha256,
      size,
      cache_key: key.to_string(),
      timestamp: unix_now(),
    };

    {
      let _guard = self.index_lock.lock().unwrap_or_else(|e| e.into_inner());
      let index_path = self.index_path(bucket);
      let mut index = ChannelIndex::read(&index_path, bucket)?;
      index.insert(record.clone());
      index.write(&index_path)?;
    }

    info!(recipe = %recipe.name, bucket, archive = %archive.display(), "published");
    Ok(PublishedPackage {
      bucket: bucket.to_string(),
      archive,
      record,
    })
  }

  /// Index of one bucket; empty if the bucket was never written.
  pub fn read_index(&self, bucket: &str) -> Result<ChannelIndex, PublishError> {
    if !Platform::all_buckets().any(|b| b == bucket) {
      return Err(PublishError::UnknownBucket(bucket.to_string()));
    }
    ChannelIndex::read(&self.index_path(bucket), bucket)
  }

  /// Whether `name`-`version` is indexed in `bucket` and its archive exists.
  pub fn contains(&self, bucket: &str, name: &str, version: &str) -> bool {
    self.published_key(bucket, name, version).is_some()
  }

  /// Cache key `name`-`version` was published under, if it is indexed in
  /// `bucket` and its archive exists.
  pub fn published_key(&self, bucket: &str, name: &str, version: &str) -> Option<String> {
    let index = self.read_index(bucket).ok()?;
    let record = index.find(name, version)?;
    let archive = self.root.join(bucket).join(&record.file);
    archive.is_file().then(|| record.cache_key.clone())
  }

  fn index_path(&self, bucket: &str) -> PathBuf {
    self.root.join(bucket).join(CHANNEL_INDEX_FILENAME)
  }
}

/// Write a gzipped tarball of `src` to `dest` through a temp file and rename.
fn write_archive(src: &Path, dest: &Path) -> Result<(), PublishError> {
  let dir = dest.parent().unwrap_or(Path::new("."));
  let io_err = |source: std::io::Error| PublishError::Io {
    path: dest.to_path_buf(),
    source,
  };

  let tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
  {
    let file: &File = tmp.as_file();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Deterministic);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", src).map_err(io_err)?;
    let mut encoder = builder.into_inner().map_err(io_err)?;
    encoder.flush().map_err(io_err)?;
    encoder.finish().map_err(io_err)?;
  }
  tmp.as_file().sync_all().map_err(io_err)?;
  tmp.persist(dest).map_err(|e| io_err(e.error))?;
  Ok(())
}
