//! Rotation Error Types
//!
//! Each variant names the subsystem that failed. The underlying storage or
//! policy error stays attached as a child in the [`exn`] error tree.

use derive_more::{Display, Error};
use keeper_policy::ArtifactKind;
use std::path::PathBuf;

/// A rotation error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for rotation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A storage backend operation (list, read, write, delete) failed.
    #[display("storage operation failed")]
    Storage,
    /// The retention policy could not be applied (bad artifact name).
    #[display("retention policy could not be applied")]
    Policy,
    /// A downloaded `.gz` artifact could not be decompressed.
    #[display("could not decompress artifact")]
    Decompress,
    /// There is no artifact of the requested kind to fetch.
    #[display("no {_0} backup to fetch")]
    NothingToFetch(#[error(not(source))] ArtifactKind),
    /// Writing a fetched artifact to the local destination failed.
    #[display("could not write to destination")]
    Io,
    /// Building a media archive or compressing a dump failed.
    #[display("could not build archive")]
    Archive,
    /// An archive source is not a directory.
    #[display("not a directory: {}", _0.display())]
    NotADirectory(#[error(not(source))] PathBuf),
    /// The artifact about to be created is already there.
    #[display("artifact already exists: {_0}")]
    AlreadyExists(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Io)
    }
}
