//! Container runtimes for isolated builds.
//!
//! A containerized build runs its script inside an image through podman or
//! docker. Every host directory the script touches is bind mounted at the same
//! path, so the build environment reads the same inside the container as it
//! would on the host.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

/// Image used when none is given.
pub const DEFAULT_IMAGE: &str = "ubuntu22";

/// Short names for the stock build images.
pub const IMAGE_ALIASES: &[(&str, &str)] = &[
  ("ubuntu22", "ubuntu:22.04"),
  ("rocky8", "rockylinux:8"),
  ("rocky9", "rockylinux:9"),
];

/// Parent variables the runtime client itself needs to reach its service.
const CLIENT_ENV: &[&str] = &[
  "PATH",
  "HOME",
  "USER",
  "XDG_RUNTIME_DIR",
  "DOCKER_HOST",
  "DOCKER_CONFIG",
  "CONTAINER_HOST",
];

#[derive(Debug, Error)]
pub enum ContainerError {
  #[error("no container runtime found (install podman or docker)")]
  NoRuntime,

  #[error("unknown container runtime '{0}' (expected podman or docker)")]
  UnknownRuntime(String),

  #[error("failed to run {program}: {source}")]
  Spawn {
    program: &'static str,
    #[source]
    source: io::Error,
  },

  #[error("{program} {action} failed: {status}")]
  Failed {
    program: &'static str,
    action: &'static str,
    status: ExitStatus,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
  Podman,
  Docker,
}

impl Runtime {
  /// Detection order. Podman comes first since it runs rootless.
  pub const ALL: [Runtime; 2] = [Runtime::Podman, Runtime::Docker];

  pub fn program(&self) -> &'static str {
    match self {
      Runtime::Podman => "podman",
      Runtime::Docker => "docker",
    }
  }

  /// The first runtime whose client answers `--version`.
  pub fn detect() -> Result<Self, ContainerError> {
    let runtime = Self::ALL
      .into_iter()
      .find(|runtime| runtime.version().is_some())
      .ok_or(ContainerError::NoRuntime)?;
    debug!(runtime = %runtime, "detected container runtime");
    Ok(runtime)
  }

  /// Client version string, or `None` if the client is not installed.
  pub fn version(&self) -> Option<String> {
    let output = Command::new(self.program())
      .arg("--version")
      .stdin(Stdio::null())
      .output()
      .ok()?;
    output
      .status
      .success()
      .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  /// Whether the runtime service answers `info`.
  pub fn is_available(&self) -> bool {
    Command::new(self.program())
      .arg("info")
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .status()
      .is_ok_and(|status| status.success())
  }
}

impl FromStr for Runtime {
  type Err = ContainerError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "podman" => Ok(Runtime::Podman),
      "docker" => Ok(Runtime::Docker),
      other => Err(ContainerError::UnknownRuntime(other.to_string())),
    }
  }
}

impl fmt::Display for Runtime {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.program())
  }
}

/// Expand an image alias; anything else is taken as a full image reference.
pub fn resolve_image(image: &str) -> String {
  IMAGE_ALIASES
    .iter()
    .find(|(alias, _)| *alias == image)
    .map(|(_, full)| full.to_string())
    .unwrap_or_else(|| image.to_string())
}

/// A host directory bind mounted at the same path inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
  pub path: PathBuf,
  pub read_only: bool,
}

impl Mount {
  pub fn read_only(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      read_only: true,
    }
  }

  pub fn writable(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      read_only: false,
    }
  }

  fn volume_arg(&self) -> String {
    let path = self.path.display();
    if self.read_only {
      format!("{path}:{path}:ro")
    } else {
      format!("{path}:{path}")
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerStatus {
  pub runtime: Runtime,
  pub available: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  pub image: String,
}

/// A runtime plus the image builds run in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
  pub runtime: Runtime,
  /// Full image reference, aliases already expanded.
  pub image: String,
  /// `uid:gid` to run as. Defaults to the invoking user on Unix so the
  /// artifacts written through mounts stay owned by them.
  pub user: Option<String>,
  /// Extra `-v` specs passed through as given.
  pub volumes: Vec<String>,
}

impl Container {
  pub fn new(runtime: Runtime, image: &str) -> Self {
    Self {
      runtime,
      image: resolve_image(image),
      user: current_user(),
      volumes: Vec::new(),
    }
  }

  pub fn status(&self) -> ContainerStatus {
    let version = self.runtime.version();
    ContainerStatus {
      runtime: self.runtime,
      available: version.is_some() && self.runtime.is_available(),
      version,
      image: self.image.clone(),
    }
  }

  /// Pull the image, streaming the runtime's progress to the terminal.
  pub fn pull(&self) -> Result<(), ContainerError> {
    info!(runtime = %self.runtime, image = %self.image, "pulling image");
    let program = self.runtime.program();
    let status = Command::new(program)
      .args(["pull", &self.image])
      .status()
      .map_err(|source| ContainerError::Spawn { program, source })?;
    if status.success() {
      Ok(())
    } else {
      Err(ContainerError::Failed {
        program,
        action: "pull",
        status,
      })
    }
  }

  /// An interactive shell in the image with `mounts` in place.
  pub fn shell_command(&self, mounts: &[Mount], workdir: Option<&Path>) -> Command {
    let mut command = Command::new(self.runtime.program());
    command.args(["run", "--rm", "-it"]);
    for mount in mounts {
      command.arg("-v").arg(mount.volume_arg());
    }
    for volume in &self.volumes {
      command.arg("-v").arg(volume);
    }
    if let Some(user) = &self.user {
      command.args(["--user", user]);
    }
    if let Some(dir) = workdir {
      command.arg("-w").arg(dir);
    }
    command.args([self.image.as_str(), "/bin/bash"]);
    command
  }

  /// Arguments for `<runtime>` that run `interpreter <script>` in the image.
  /// The script path is appended by the caller and must lie in a mount.
  ///
  /// `env` becomes the whole container environment except `PATH`, which the
  /// image provides.
  pub fn run_args(
    &self,
    mounts: &[Mount],
    workdir: &Path,
    env: &BTreeMap<String, String>,
    interpreter: &str,
  ) -> Vec<String> {
    let mut args: Vec<String> = ["run", "--rm", "--init"].map(String::from).to_vec();

    for mount in mounts {
      args.push("-v".to_string());
      args.push(mount.volume_arg());
    }
    for volume in &self.volumes {
      args.push("-v".to_string());
      args.push(volume.clone());
    }
    for (key, value) in env.iter().filter(|(key, _)| key.as_str() != "PATH") {
      args.push("-e".to_string());
      args.push(format!("{key}={value}"));
    }
    if let Some(user) = &self.user {
      args.push("--user".to_string());
      args.push(user.clone());
    }
    args.push("-w".to_string());
    args.push(workdir.display().to_string());
    args.push(self.image.clone());
    args.push(interpreter.to_string());
    args
  }

  /// Environment for the runtime client process.
  pub fn client_env(&self) -> BTreeMap<String, String> {
    CLIENT_ENV
      .iter()
      .filter_map(|var| Some((var.to_string(), std::env::var(var).ok()?)))
      .collect()
  }
}

#[cfg(unix)]
fn current_user() -> Option<String> {
  use rustix::process::{getgid, getuid};
  Some(format!("{}:{}", getuid().as_raw(), getgid().as_raw()))
}

#[cfg(not(unix))]
fn current_user() -> Option<String> {
  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  fn container() -> Container {
    Container {
      runtime: Runtime::Podman,
      image: resolve_image("rocky9"),
      user: Some("1000:1000".into()),
      volumes: Vec::new(),
    }
  }

  #[test]
  fn aliases_expand_and_references_pass_through() {
    assert_eq!(resolve_image("ubuntu22"), "ubuntu:22.04");
    assert_eq!(resolve_image("rocky8"), "rockylinux:8");
    assert_eq!(resolve_image("ghcr.io/acme/builder:1"), "ghcr.io/acme/builder:1");
  }

  #[test]
  fn runtime_parses_known_names_only() {
    assert_eq!("docker".parse::<Runtime>().unwrap(), Runtime::Docker);
    assert_eq!(Runtime::Podman.to_string(), "podman");
    assert!(matches!(
      "lxc".parse::<Runtime>(),
      Err(ContainerError::UnknownRuntime(name)) if name == "lxc"
    ));
  }

  #[test]
  fn run_args_mount_env_and_image() {
    let env = BTreeMap::from([
      ("PATH".to_string(), "/usr/bin".to_string()),
      ("PREFIX".to_string(), "/out/artifacts/zlib.partial".to_string()),
      ("PKG_NAME".to_string(), "zlib".to_string()),
    ]);
    let mounts = [
      Mount::read_only("/recipes/zlib"),
      Mount::writable("/out/work/zlib"),
    ];

    let args = container().run_args(&mounts, Path::new("/out/work/zlib"), &env, "/bin/sh");

    assert_eq!(&args[..3], ["run", "--rm", "--init"]);
    let joined = args.join(" ");
    assert!(joined.contains("-v /recipes/zlib:/recipes/zlib:ro"));
    assert!(joined.contains("-v /out/work/zlib:/out/work/zlib "));
    assert!(joined.contains("-e PREFIX=/out/artifacts/zlib.partial"));
    assert!(joined.contains("-e PKG_NAME=zlib"));
    assert!(!joined.contains("PATH="), "the image keeps its own PATH");
    assert!(joined.contains("--user 1000:1000"));
    assert!(joined.ends_with("-w /out/work/zlib rockylinux:9 /bin/sh"));
  }

  #[test]
  fn extra_volumes_follow_build_mounts() {
    let mut container = container();
    container.volumes = vec!["/opt/sdk:/opt/sdk:ro".into()];
    container.user = None;

    let args = container.run_args(&[Mount::writable("/w")], Path::new("/w"), &BTreeMap::new(), "/bin/sh");
    assert_eq!(
      args,
      vec![
        "run", "--rm", "--init", "-v", "/w:/w", "-v", "/opt/sdk:/opt/sdk:ro", "-w", "/w", "rockylinux:9", "/bin/sh"
      ]
    );
  }

  #[test]
  fn shell_is_interactive() {
    let command = container().shell_command(&[Mount::read_only("/recipes")], Some(Path::new("/recipes")));
    let args: Vec<String> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
    assert_eq!(command.get_program(), "podman");
    assert_eq!(&args[..3], ["run", "--rm", "-it"]);
    assert_eq!(args.last().map(String::as_str), Some("/bin/bash"));
    assert!(args.contains(&"/recipes:/recipes:ro".to_string()));
  }

  #[test]
  #[serial]
  fn client_env_keeps_only_runtime_variables() {
    temp_env::with_vars(
      [
        ("DOCKER_HOST", Some("unix:///tmp/docker.sock")),
        ("FORGE_SECRET", Some("x")),
      ],
      || {
        let env = container().client_env();
        assert_eq!(env["DOCKER_HOST"], "unix:///tmp/docker.sock");
        assert!(!env.contains_key("FORGE_SECRET"));
      },
    );
  }
}
