//! Copy backup artifacts to the remote backend.

use crate::error::{ErrorKind, Result};
use crate::listing::{ArtifactEntry, discover};
use async_stream::stream;
use exn::ResultExt;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use keeper_storage::{BackendHandle, FileInfo};
use std::collections::HashMap;
use std::path::PathBuf;

/// Number of uploads in flight at once.
const MAX_TRANSFER_CONCURRENCY: usize = 8;

/// What happens to local copies once the remote holds them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LocalMode {
    /// Leave the local backup directory untouched.
    #[default]
    Keep,
    /// Delete the local artifacts this run uploaded.
    RemoveUploaded,
    /// Delete every local artifact the remote now holds, including ones
    /// pushed by earlier runs.
    RemoveAll,
}

/// Progress events emitted by [`push`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started), exactly once.
/// 2. [`Discovered`](Self::Discovered), exactly once, with the number of
///    local backup files.
/// 3. [`Uploaded`](Self::Uploaded) or [`AlreadyPresent`](Self::AlreadyPresent)
///    once per file, in completion order.
/// 4. [`RemovedLocal`](Self::RemovedLocal) per deleted local artifact (a
///    file or a whole snapshot directory), depending on the [`LocalMode`].
/// 5. [`Complete`](Self::Complete), exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Started,
    Discovered(u64),
    Uploaded(PathBuf),
    /// The remote already holds a file of the same path and size.
    AlreadyPresent(PathBuf),
    RemovedLocal(PathBuf),
    Complete,
}

/// Streams [`PushEvent`]s while uploading every recognised backup artifact
/// file from `local` that `remote` doesn't hold yet.
///
/// Failed uploads are surfaced as `Err` items without terminating the stream;
/// an artifact with a failed upload is never deleted locally.
pub fn push<'a>(
    local: &'a BackendHandle,
    remote: &'a BackendHandle,
    mode: LocalMode,
) -> impl Stream<Item = Result<PushEvent>> + 'a {
    stream!({
        yield Ok(PushEvent::Started);

        let entries = match discover(local.as_ref(), None).await.or_raise(|| ErrorKind::Storage) {
            Ok(entries) => entries,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        let files: Vec<FileInfo> = entries.iter().flat_map(|entry| entry.files.iter().cloned()).collect();
        let present: HashMap<PathBuf, u64> = match remote.list(None).await.or_raise(|| ErrorKind::Storage) {
            Ok(remote_files) => remote_files.into_iter().map(|file| (file.path, file.size)).collect(),
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        yield Ok(PushEvent::Discovered(files.len() as u64));
        tracing::info!(local = local.name(), remote = remote.name(), files = files.len(), "Pushing backups");

        // Path of every file the remote now holds; `true` if this run uploaded it.
        let mut on_remote: HashMap<PathBuf, bool> = HashMap::with_capacity(files.len());
        let mut futures: Vec<_> = files.into_iter().map(|file| upload(local, remote, file, &present)).collect();
        let mut processing = FuturesUnordered::new();
        processing.extend(futures.drain(..MAX_TRANSFER_CONCURRENCY.min(futures.len())));
        while let Some(result) = processing.next().await {
            match result {
                Ok(event) => {
                    match &event {
                        PushEvent::Uploaded(path) => on_remote.insert(path.clone(), true),
                        PushEvent::AlreadyPresent(path) => on_remote.insert(path.clone(), false),
                        _ => None,
                    };
                    yield Ok(event);
                },
                Err(e) => yield Err(e),
            }
            // Pop-n-push, but FIFO instead of LIFO.
            if !futures.is_empty() {
                processing.push(futures.remove(0));
            }
        }

        for entry in entries.iter().filter(|entry| removable(entry, &on_remote, mode)) {
            yield remove_local(local, entry).await;
        }

        yield Ok(PushEvent::Complete);
    })
}

/// Whether the local copy of `entry` goes, given which of its files the
/// remote now holds. Artifacts with any file missing remotely always stay.
fn removable(entry: &ArtifactEntry, on_remote: &HashMap<PathBuf, bool>, mode: LocalMode) -> bool {
    if entry.files.is_empty() {
        return false;
    }
    let Some(uploaded) = entry
        .files
        .iter()
        .map(|file| on_remote.get(&file.path).copied())
        .collect::<Option<Vec<bool>>>()
    else {
        return false;
    };
    match mode {
        LocalMode::Keep => false,
        LocalMode::RemoveUploaded => uploaded.contains(&true),
        LocalMode::RemoveAll => true,
    }
}

/// Delete one local artifact; a snapshot directory goes as a whole.
async fn remove_local(local: &BackendHandle, entry: &ArtifactEntry) -> Result<PushEvent> {
    let path = PathBuf::from(&entry.name);
    if entry.is_directory() {
        local.delete_prefix(&path).await.or_raise(|| ErrorKind::Storage)?;
    } else {
        local.delete(&path).await.or_raise(|| ErrorKind::Storage)?;
    }
    tracing::debug!(artifact = %entry.name, "Removed local copy");
    Ok(PushEvent::RemovedLocal(path))
}

async fn upload(
    local: &BackendHandle,
    remote: &BackendHandle,
    file: FileInfo,
    present: &HashMap<PathBuf, u64>,
) -> Result<PushEvent> {
    if present.get(&file.path) == Some(&file.size) {
        tracing::debug!(path = %file.path.display(), "Already on remote");
        return Ok(PushEvent::AlreadyPresent(file.path));
    }
    let data = local.read(&file.path).await.or_raise(|| ErrorKind::Storage)?;
    remote.write(&file.path, &data).await.or_raise(|| ErrorKind::Storage)?;
    tracing::info!(path = %file.path.display(), bytes = data.len(), remote = remote.name(), "Uploaded backup");
    Ok(PushEvent::Uploaded(file.path))
}
