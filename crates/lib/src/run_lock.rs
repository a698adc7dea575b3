//! Advisory run lock so only one forge run mutates a cache or channel at a time.
//!
//! Each guarded root gets a `.lock` file holding JSON metadata about the
//! holder. The lock is a non-blocking exclusive `flock` (or `LockFileEx` on
//! Windows) and is released when the guard is dropped.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::util::fs::unix_now;

const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub root: PathBuf,
}

#[derive(Debug, Error)]
pub enum RunLockError {
  #[error(
    "another forge run holds {}: {command} (PID {pid}, started at unix time {started_at_unix})\n\
     If you're sure no forge process is running, remove the lock file.",
    .lock_path.display()
  )]
  AlreadyRunning {
    command: String,
    pid: u32,
    started_at_unix: u64,
    lock_path: PathBuf,
  },

  #[error(
    "another forge run holds {} (could not read lock metadata)",
    .lock_path.display()
  )]
  AlreadyRunningUnknown { lock_path: PathBuf },

  #[error("failed to create {}: {source}", .path.display())]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file {}: {source}", .path.display())]
  OpenFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// Lock on a single root directory.
#[derive(Debug)]
pub struct DirLock {
  file: File,
  lock_path: PathBuf,
}

/// Held for the duration of a run; covers the cache root and the channel root.
#[derive(Debug)]
pub struct RunLock {
  locks: Vec<DirLock>,
}

impl RunLock {
  /// Lock every root in `roots`, failing immediately if any is held elsewhere.
  ///
  /// Roots are locked in sorted order and duplicates are locked once, so two
  /// runs sharing roots cannot deadlock and a single root shared by the cache
  /// and the channel does not contend with itself.
  pub fn acquire(roots: &[&Path], command: &str) -> Result<Self, RunLockError> {
    let mut sorted: Vec<PathBuf> = roots.iter().map(|r| r.to_path_buf()).collect();
    sorted.sort();
    sorted.dedup();

    let mut locks = Vec::with_capacity(sorted.len());
    for root in &sorted {
      // Locks acquired so far are released by drop if a later one fails
      locks.push(DirLock::acquire(root, command)?);
    }

    debug!(roots = sorted.len(), command, "run lock acquired");
    Ok(Self { locks })
  }

  pub fn lock_paths(&self) -> impl Iterator<Item = &Path> {
    self.locks.iter().map(|l| l.lock_path.as_path())
  }
}

impl DirLock {
  pub fn acquire(root: &Path, command: &str) -> Result<Self, RunLockError> {
    std::fs::create_dir_all(root).map_err(|source| RunLockError::CreateDir {
      path: root.to_path_buf(),
      source,
    })?;
    let lock_path = root.join(LOCK_FILENAME);

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(|source| RunLockError::OpenFile {
        path: lock_path.clone(),
        source,
      })?;

    if let Err(err) = try_lock_exclusive(&file) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(read_contention_error(&lock_path));
      }
      return Err(RunLockError::LockFailed(err));
    }

    write_metadata(&file, command, root)?;
    Ok(Self { file, lock_path })
  }

  /// Read the metadata back through the held handle.
  ///
  /// Opening a second handle would fail on Windows, where locks are mandatory.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn write_metadata(file: &File, command: &str, root: &Path) -> Result<(), RunLockError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: unix_now(),
    command: command.to_string(),
    root: root.to_path_buf(),
  };

  file.set_len(0).map_err(RunLockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata).map_err(|e| RunLockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(RunLockError::WriteMetadata)?;
  Ok(())
}

fn read_contention_error(lock_path: &Path) -> RunLockError {
  if let Ok(mut file) = File::open(lock_path) {
    let mut contents = String::new();
    if file.read_to_string(&mut contents).is_ok()
      && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
    {
      return RunLockError::AlreadyRunning {
        command: metadata.command,
        pid: metadata.pid,
        started_at_unix: metadata.started_at_unix,
        lock_path: lock_path.to_path_buf(),
      };
    }
  }

  RunLockError::AlreadyRunningUnknown {
    lock_path: lock_path.to_path_buf(),
  }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is plain data and valid when zeroed; the handle is
  // owned by `file` and open for the duration of the call.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(
      handle,
      LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
      0,
      1,
      0,
      &mut overlapped,
    )
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
