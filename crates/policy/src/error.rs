//! Retention Policy Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Two families exist: a backup name
//! that can't be trusted ([`ParseError`]), and a retention policy that can't
//! be applied ([`ConfigurationError`]).

use crate::interval::Granularity;
use derive_more::{Display, Error};

/// A retention policy error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for retention policy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An artifact name is malformed. Abort processing of that artifact
    /// class rather than guessing its retention fate.
    #[display("{_0}")]
    Parse(ParseError),
    /// The retention policy is incomplete. Callers usually skip cleanup for
    /// the affected artifact class and carry on with the rest of the run.
    #[display("{_0}")]
    Configuration(ConfigurationError),
}

/// The timestamp embedded in an artifact name could not be recovered.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No `YYYYMMDD-HHMMSS` substring anywhere in the name.
    #[display("no timestamp found in artifact name: {_0}")]
    NoTimestampFound(#[error(not(source))] String),
    /// The substring was found but is not a real calendar date and time.
    #[display("invalid timestamp in artifact name: {_0}")]
    InvalidTimestamp(#[error(not(source))] String),
}

/// The retention counts can't be turned into a usable policy.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[display("retention policy is missing the `{_0}` count")]
    MissingKey(#[error(not(source))] Granularity),
}

impl From<ParseError> for ErrorKind {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}
impl From<ConfigurationError> for ErrorKind {
    fn from(err: ConfigurationError) -> Self {
        Self::Configuration(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Pure computation over names and counts: the same input always
        // fails the same way.
        false
    }

    /// The granularity whose count is missing, if this is a configuration error.
    pub fn missing_key(&self) -> Option<Granularity> {
        match self {
            Self::Configuration(ConfigurationError::MissingKey(granularity)) => Some(*granularity),
            Self::Parse(_) => None,
        }
    }
}
