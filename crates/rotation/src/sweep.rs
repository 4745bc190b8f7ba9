//! Removal of incomplete media snapshots.
//!
//! A snapshot directory is only complete once its sentinel file has been
//! written. Directories without one are left over from interrupted runs and
//! are removed regardless of retention counts.

use crate::error::{ErrorKind, Result};
use crate::listing::discover;
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use keeper_policy::ArtifactKind;
use keeper_storage::BackendHandle;
use std::path::Path;

/// Progress events emitted by [`sweep`], in the order `Started`,
/// `Discovered`, per-snapshot events, `Complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepEvent {
    Started,
    /// Number of snapshot directories examined.
    Discovered(u64),
    Intact(String),
    /// An incomplete snapshot was deleted, along with this many files.
    Swept { name: String, files: u64 },
    Complete,
}

/// Streams [`SweepEvent`]s while deleting media snapshot directories in
/// `backend` that lack the `sentinel` file.
///
/// Media archives (files) are not snapshots and are never touched. A
/// snapshot directory holding no files at all is incomplete too.
pub fn sweep<'a>(backend: &'a BackendHandle, sentinel: &'a str) -> impl Stream<Item = Result<SweepEvent>> + 'a {
    stream!({
        yield Ok(SweepEvent::Started);

        let snapshots: Vec<_> = match discover(backend.as_ref(), Some(ArtifactKind::Media)).await.or_raise(|| ErrorKind::Storage) {
            Ok(entries) => entries.into_iter().filter(|entry| entry.is_directory()).collect(),
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        yield Ok(SweepEvent::Discovered(snapshots.len() as u64));

        for snapshot in snapshots {
            if snapshot.contains(sentinel) {
                yield Ok(SweepEvent::Intact(snapshot.name));
                continue;
            }
            tracing::warn!(backend = backend.name(), snapshot = %snapshot.name, sentinel, "Snapshot is incomplete");
            yield match backend.delete_prefix(Path::new(&snapshot.name)).await.or_raise(|| ErrorKind::Storage) {
                Ok(files) => Ok(SweepEvent::Swept { name: snapshot.name, files }),
                Err(e) => Err(e),
            };
        }

        yield Ok(SweepEvent::Complete);
    })
}
