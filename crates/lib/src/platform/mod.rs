//! Target platform identification.
//!
//! A [`Platform`] names the machine a recipe is built for. Its channel
//! subdirectory (`linux-64`, `osx-arm64`, ...) partitions published artifacts,
//! and its [`Platform::script_keys`] decide which build script a recipe runs.

pub mod arch;
pub mod os;
pub mod paths;

use std::fmt;
use std::str::FromStr;

use arch::Arch;
use os::Os;
use thiserror::Error;

use crate::consts::NOARCH_SUBDIR;

/// Platform identifier combining architecture and OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlatformError {
  #[error("unknown platform '{0}' (expected one of: {list})", list = Platform::SUBDIRS.join(", "))]
  Unknown(String),

  #[error("the current operating system or architecture is not supported")]
  Unsupported,
}

impl Platform {
  /// Every channel subdirectory forge publishes into, excluding `noarch`.
  pub const SUBDIRS: &'static [&'static str] = &[
    "linux-64",
    "linux-aarch64",
    "osx-64",
    "osx-arm64",
    "win-64",
    "win-arm64",
  ];

  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// Detect the current platform at runtime.
  pub fn current() -> Result<Self, PlatformError> {
    Ok(Self {
      arch: Arch::current().ok_or(PlatformError::Unsupported)?,
      os: Os::current().ok_or(PlatformError::Unsupported)?,
    })
  }

  /// The channel subdirectory for this platform.
  pub fn subdir(&self) -> &'static str {
    match (self.os, self.arch) {
      (Os::Linux, Arch::X86_64) => "linux-64",
      (Os::Linux, Arch::Aarch64) => "linux-aarch64",
      (Os::MacOs, Arch::X86_64) => "osx-64",
      (Os::MacOs, Arch::Aarch64) => "osx-arm64",
      (Os::Windows, Arch::X86_64) => "win-64",
      (Os::Windows, Arch::Aarch64) => "win-arm64",
    }
  }

  /// Build-script keys in lookup order, most specific first.
  pub fn script_keys(&self) -> [&'static str; 4] {
    [self.subdir(), self.os.as_str(), self.os.family(), "any"]
  }

  /// All channel buckets, including the platform-independent one.
  pub fn all_buckets() -> impl Iterator<Item = &'static str> {
    Self::SUBDIRS.iter().copied().chain(std::iter::once(NOARCH_SUBDIR))
  }
}

impl FromStr for Platform {
  type Err = PlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let platform = match s {
      "linux-64" => Self::new(Arch::X86_64, Os::Linux),
      "linux-aarch64" => Self::new(Arch::Aarch64, Os::Linux),
      "osx-64" => Self::new(Arch::X86_64, Os::MacOs),
      "osx-arm64" => Self::new(Arch::Aarch64, Os::MacOs),
      "win-64" => Self::new(Arch::X86_64, Os::Windows),
      "win-arm64" => Self::new(Arch::Aarch64, Os::Windows),
      other => return Err(PlatformError::Unknown(other.to_string())),
    };
    Ok(platform)
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.subdir())
  }
}
