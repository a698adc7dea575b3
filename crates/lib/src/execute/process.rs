//! Child process lifecycle: spawn, stream, wait, terminate.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::output::{OutputLine, Stream, spawn_reader};
use super::types::ExecuteError;

/// How a started process ended.
#[derive(Debug)]
pub enum ProcessEnd {
  Exited(ExitStatus),
  Cancelled,
  TimedOut(Duration),
}

/// A script invocation.
pub struct ScriptCommand<'a> {
  pub program: &'a str,
  pub args: &'a [String],
  pub script: &'a Path,
  pub cwd: &'a Path,
  pub env: &'a BTreeMap<String, String>,
}

/// Spawn the script in its own process tree with a cleared environment and
/// forward its output to `tx`. Returns once the process has ended and both
/// pipes are drained.
pub async fn run(
  cmd: ScriptCommand<'_>,
  tx: mpsc::Sender<OutputLine>,
  cancel: &CancellationToken,
  timeout: Option<Duration>,
  kill_grace: Duration,
) -> Result<ProcessEnd, ExecuteError> {
  let mut command = Command::new(cmd.program);
  command
    .args(cmd.args)
    .arg(cmd.script)
    .current_dir(cmd.cwd)
    .env_clear()
    .envs(cmd.env)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  #[cfg(unix)]
  command.process_group(0);

  debug!(program = cmd.program, script = %cmd.script.display(), "spawning build script");
  let mut child = command.spawn().map_err(|e| ExecuteError::Spawn {
    message: format!("{}: {e}", cmd.program),
  })?;
  let tree = ProcessTree::attach(&child);

  let mut readers = Vec::with_capacity(2);
  if let Some(stdout) = child.stdout.take() {
    readers.push(spawn_reader(stdout, Stream::Stdout, tx.clone()));
  }
  if let Some(stderr) = child.stderr.take() {
    readers.push(spawn_reader(stderr, Stream::Stderr, tx.clone()));
  }
  drop(tx);

  let deadline = async {
    match timeout {
      Some(after) => tokio::time::sleep(after).await,
      None => std::future::pending().await,
    }
  };

  let end = tokio::select! {
    status = child.wait() => ProcessEnd::Exited(status?),
    _ = cancel.cancelled() => {
      terminate(&mut child, &tree, kill_grace).await;
      ProcessEnd::Cancelled
    }
    _ = deadline => {
      terminate(&mut child, &tree, kill_grace).await;
      ProcessEnd::TimedOut(timeout.unwrap_or_default())
    }
  };

  // Background jobs left in the tree would hold the pipes open
  tree.kill();

  for reader in readers {
    let _ = reader.await;
  }

  Ok(end)
}

/// Ask the tree to stop, wait up to `grace`, then kill it.
async fn terminate(child: &mut Child, tree: &ProcessTree, grace: Duration) {
  if tree.request_stop() && tokio::time::timeout(grace, child.wait()).await.is_ok() {
    return;
  }
  tree.kill();

  if let Err(e) = child.start_kill() {
    debug!(error = %e, "build process already gone");
  }
  if let Err(e) = child.wait().await {
    warn!(error = %e, "failed to reap build process");
  }
}

/// The script and everything it spawned.
///
/// On Unix this is the process group the script leads. On Windows the script
/// is placed in a job object that kills its members when closed.
struct ProcessTree {
  #[cfg(unix)]
  pid: Option<u32>,
  #[cfg(windows)]
  job: Option<job::JobObject>,
}

impl ProcessTree {
  #[cfg(unix)]
  fn attach(child: &Child) -> Self {
    Self { pid: child.id() }
  }

  #[cfg(windows)]
  fn attach(child: &Child) -> Self {
    let job = child.raw_handle().and_then(|process| match job::JobObject::for_process(process) {
      Ok(job) => Some(job),
      Err(e) => {
        warn!(error = %e, "failed to place build script in a job object");
        None
      }
    });
    Self { job }
  }

  #[cfg(not(any(unix, windows)))]
  fn attach(_child: &Child) -> Self {
    Self {}
  }

  /// Send a graceful stop request. False when the platform has none.
  fn request_stop(&self) -> bool {
    #[cfg(unix)]
    if let Some(pid) = self.pid {
      signal_group(pid, rustix::process::Signal::TERM);
      return true;
    }
    false
  }

  fn kill(&self) {
    #[cfg(unix)]
    if let Some(pid) = self.pid {
      signal_group(pid, rustix::process::Signal::KILL);
    }

    #[cfg(windows)]
    if let Some(job) = &self.job {
      job.terminate();
    }
  }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: rustix::process::Signal) {
  use rustix::process::{Pid, kill_process_group};

  let Some(pid) = i32::try_from(pid).ok().and_then(Pid::from_raw) else {
    return;
  };
  // ESRCH once the whole group is gone
  let _ = kill_process_group(pid, signal);
}

#[cfg(windows)]
mod job {
  use std::ffi::c_void;
  use std::io;
  use std::os::windows::io::RawHandle;

  use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
  use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
    JobObjectExtendedLimitInformation, SetInformationJobObject, TerminateJobObject,
  };

  /// An owned job object handle. Closing it kills every process in the job.
  pub struct JobObject(HANDLE);

  // SAFETY: the handle is owned and only passed to thread-safe kernel calls.
  unsafe impl Send for JobObject {}
  unsafe impl Sync for JobObject {}

  impl JobObject {
    /// Create an anonymous kill-on-close job and assign `process` to it.
    pub fn for_process(process: RawHandle) -> io::Result<Self> {
      // SAFETY: null attributes and name create an anonymous job.
      let handle = unsafe { CreateJobObjectW(std::ptr::null(), std::ptr::null()) };
      if handle.is_null() {
        return Err(io::Error::last_os_error());
      }
      let job = Self(handle);

      // SAFETY: the limit struct is plain data and valid when zeroed; its
      // pointer and size describe a live local for the duration of the call.
      let configured = unsafe {
        let mut limits: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = std::mem::zeroed();
        limits.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
        SetInformationJobObject(
          job.0,
          JobObjectExtendedLimitInformation,
          (&raw const limits).cast::<c_void>(),
          std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
        )
      };
      if configured == 0 {
        return Err(io::Error::last_os_error());
      }

      // SAFETY: `process` is the live child handle owned by tokio.
      if unsafe { AssignProcessToJobObject(job.0, process as HANDLE) } == 0 {
        return Err(io::Error::last_os_error());
      }
      Ok(job)
    }

    pub fn terminate(&self) {
      // SAFETY: the handle stays open until drop. Failure means the job is
      // already empty.
      unsafe {
        TerminateJobObject(self.0, 1);
      }
    }
  }

  impl Drop for JobObject {
    fn drop(&mut self) {
      // SAFETY: the handle was returned by CreateJobObjectW and is closed once.
      unsafe {
        CloseHandle(self.0);
      }
    }
  }
}

/// Exit code and terminating signal of a finished process.
pub fn exit_details(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
  #[cfg(unix)]
  {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
  }

  #[cfg(not(unix))]
  {
    (status.code(), None)
  }
}
