//! Configuration Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Configuration file does not exist
    #[display("configuration file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Configuration could not be parsed or has the wrong shape
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
    /// A configured directory is not an absolute path
    #[display("configured path must be absolute: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Configuration problems never fix themselves; the file has to change.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
