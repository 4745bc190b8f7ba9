//! Backup rotation across storage backends.
//!
//! Everything here operates on a [`BackendHandle`](keeper_storage::BackendHandle)
//! so the same code serves the local backup directory and the remote copy.
//! Long-running operations are exposed as streams of progress events; the
//! caller decides how to report them.

mod archive;
pub mod error;
mod fetch;
mod listing;
mod prune;
mod push;
mod sweep;

pub use crate::archive::{CompressEvent, archive_directories, compress_dumps};
pub use crate::fetch::fetch_latest;
pub use crate::prune::{PruneEvent, prune};
pub use crate::push::{LocalMode, PushEvent, push};
pub use crate::sweep::{SweepEvent, sweep};
