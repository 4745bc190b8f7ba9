//! Command Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open storage backend `{_0}`")]
    Backend(#[error(not(source))] &'static str),
    #[display("no remote configured")]
    NoRemote,
    #[display("fetch failed")]
    Fetch,
    #[display("archive failed")]
    Archive,
    #[display("no directories to archive (pass some or set `archive.directories`)")]
    NothingToArchive,
    /// Some items failed; each failure has already been logged.
    #[display("{_0} operation(s) failed")]
    Failed(#[error(not(source))] u64),
}
