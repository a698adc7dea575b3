//! Local package channel: platform buckets of archives plus an index each.
//!
//! ```text
//! <channel>/
//!   linux-64/
//!     index.json
//!     zlib-1.3.1.tar.gz
//!   noarch/
//!     index.json
//! ```

mod index;
mod publish;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::util::hash::DirHashError;

pub use index::{ChannelIndex, PackageRecord};
pub use publish::{ChannelPublisher, PublishedPackage};

#[derive(Debug, Error)]
pub enum PublishError {
  #[error("channel I/O error at {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("artifact directory not found: {}", .0.display())]
  MissingArtifact(PathBuf),

  #[error("failed to hash archive: {0}")]
  Hash(#[from] DirHashError),

  #[error("invalid channel index {}: {message}", .path.display())]
  Index { path: PathBuf, message: String },

  #[error("unknown channel bucket '{0}'")]
  UnknownBucket(String),
}
