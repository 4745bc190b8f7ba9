//! Retention pruning.
//!
//! Lists a backend, applies the retention policy for one kind of artifact and
//! deletes everything the policy does not keep.

use crate::error::{ErrorKind, Result};
use crate::listing::{ArtifactEntry, discover};
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use keeper_policy::{ArtifactKind, Granularity, Policy, RetentionCounts, decide_with_policy};
use keeper_storage::BackendHandle;
use std::collections::HashSet;
use std::path::Path;
use time::PrimitiveDateTime;

/// Progress events emitted by [`prune`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started), exactly once.
/// 2. Either [`Skipped`](Self::Skipped), when the policy is incomplete, or
///    [`Discovered`](Self::Discovered) with the number of artifacts of the
///    requested kind.
/// 3. [`Retained`](Self::Retained) or [`Removed`](Self::Removed), once per
///    discovered artifact, in ascending name order.
/// 4. [`Complete`](Self::Complete), exactly once.
///
/// A listing failure or an unparseable artifact name ends the stream early
/// with an error, before anything is deleted; [`Complete`](Self::Complete) is
/// then never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneEvent {
    Started,
    /// The policy has no count for this tier; nothing was listed or removed.
    Skipped(Granularity),
    Discovered(u64),
    Retained(String),
    /// An artifact was deleted, along with this many files.
    Removed { name: String, files: u64 },
    Complete,
}

/// Streams [`PruneEvent`]s while pruning `kind` artifacts from `backend`.
///
/// `now` anchors every retention window; read it once per run and pass the
/// same value to every backend so local and remote agree. Individual delete
/// failures are surfaced as `Err` items without terminating the stream.
pub fn prune<'a>(
    backend: &'a BackendHandle,
    kind: ArtifactKind,
    counts: RetentionCounts,
    now: PrimitiveDateTime,
) -> impl Stream<Item = Result<PruneEvent>> + 'a {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    stream!({
        yield Ok(PruneEvent::Started);

        let policy = match Policy::try_from(&counts) {
            Ok(policy) => policy,
            Err(e) => match e.missing_key() {
                Some(granularity) => {
                    tracing::warn!(
                        backend = backend.name(),
                        %kind,
                        %granularity,
                        "Retention policy incomplete, nothing cleaned"
                    );
                    yield Ok(PruneEvent::Skipped(granularity));
                    yield Ok(PruneEvent::Complete);
                    return;
                },
                None => {
                    yield Err(e.raise(ErrorKind::Policy));
                    return;
                },
            },
        };

        let entries = match discover(backend.as_ref(), Some(kind)).await.or_raise(|| ErrorKind::Storage) {
            Ok(entries) => entries,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        yield Ok(PruneEvent::Discovered(entries.len() as u64));

        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        let decision = match decide_with_policy(&names, &policy, now).or_raise(|| ErrorKind::Policy) {
            Ok(decision) => decision,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        tracing::info!(
            backend = backend.name(),
            %kind,
            keep = decision.keep.len(),
            remove = decision.remove.len(),
            "Pruning backups"
        );

        let remove: HashSet<&str> = decision.remove.iter().map(String::as_str).collect();
        for entry in &entries {
            if !remove.contains(entry.name.as_str()) {
                yield Ok(PruneEvent::Retained(entry.name.clone()));
                continue;
            }
            yield remove_entry(backend, entry).await.map(|files| PruneEvent::Removed {
                name: entry.name.clone(),
                files,
            });
        }

        yield Ok(PruneEvent::Complete);
    })
}

/// Delete one artifact: a single file, or every file of a snapshot directory.
async fn remove_entry(backend: &BackendHandle, entry: &ArtifactEntry) -> Result<u64> {
    let path = Path::new(&entry.name);
    let files = if entry.is_directory() {
        backend.delete_prefix(path).await.or_raise(|| ErrorKind::Storage)?
    } else {
        backend.delete(path).await.or_raise(|| ErrorKind::Storage)?;
        1
    };
    tracing::info!(backend = backend.name(), artifact = %entry.name, files, "Removed backup");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use keeper_storage::backend::{LocalBackend, MockBackend, ReadOnlyBackend};
    use std::path::PathBuf;
    use std::sync::Arc;
    use time::macros::datetime;

    const NOW: PrimitiveDateTime = datetime!(2023-01-31 12:00);

    async fn collect(backend: &BackendHandle, kind: ArtifactKind, counts: RetentionCounts) -> Vec<PruneEvent> {
        prune(backend, kind, counts, NOW).map(|event| event.unwrap()).collect().await
    }

    fn mock(names: &[&str]) -> (Arc<MockBackend>, BackendHandle) {
        let mock = Arc::new(MockBackend::with_names(names.iter().copied()));
        let handle: BackendHandle = mock.clone();
        (mock, handle)
    }

    #[tokio::test]
    async fn test_prune_daily() {
        let (mock, backend) = mock(&[
            "backup_20230129-010000.sql.gz",
            "backup_20230130-010000.sql.gz",
            "backup_20230131-010000.sql.gz",
            "backup_20230131-020000.sql.gz",
            "dir_20230101-000000.tar.gz",
            "notes.txt",
        ]);
        let events = collect(&backend, ArtifactKind::Database, RetentionCounts::new(0, 0, 2)).await;
        assert_eq!(
            events,
            vec![
                PruneEvent::Started,
                PruneEvent::Discovered(4),
                PruneEvent::Removed {
                    name: "backup_20230129-010000.sql.gz".to_string(),
                    files: 1
                },
                PruneEvent::Retained("backup_20230130-010000.sql.gz".to_string()),
                PruneEvent::Retained("backup_20230131-010000.sql.gz".to_string()),
                PruneEvent::Removed {
                    name: "backup_20230131-020000.sql.gz".to_string(),
                    files: 1
                },
                PruneEvent::Complete,
            ]
        );
        assert_eq!(
            mock.paths().await,
            vec![
                PathBuf::from("backup_20230130-010000.sql.gz"),
                PathBuf::from("backup_20230131-010000.sql.gz"),
                PathBuf::from("dir_20230101-000000.tar.gz"),
                PathBuf::from("notes.txt"),
            ]
        );
    }

    #[tokio::test]
    async fn test_prune_snapshot_directories() {
        let (mock, backend) = mock(&[
            "dir_20230130-010000/a.png",
            "dir_20230130-010000/.complete",
            "dir_20230131-010000/a.png",
            "dir_20230131-010000/.complete",
        ]);
        let events = collect(&backend, ArtifactKind::Media, RetentionCounts::new(0, 0, 1)).await;
        assert!(events.contains(&PruneEvent::Removed {
            name: "dir_20230130-010000".to_string(),
            files: 2
        }));
        assert_eq!(
            mock.paths().await,
            vec![PathBuf::from("dir_20230131-010000/.complete"), PathBuf::from("dir_20230131-010000/a.png")]
        );
    }

    #[tokio::test]
    async fn test_prune_counts_empty_snapshot_directories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir(root.join("dir_20230130-010000")).unwrap();
        std::fs::create_dir(root.join("dir_20230131-010000")).unwrap();
        std::fs::write(root.join("dir_20230131-010000/a.png"), b"png").unwrap();
        let backend: BackendHandle = Arc::new(LocalBackend::new("local", root).unwrap());

        let events = collect(&backend, ArtifactKind::Media, RetentionCounts::new(0, 0, 1)).await;
        assert_eq!(
            events,
            vec![
                PruneEvent::Started,
                PruneEvent::Discovered(2),
                PruneEvent::Removed {
                    name: "dir_20230130-010000".to_string(),
                    files: 0
                },
                PruneEvent::Retained("dir_20230131-010000".to_string()),
                PruneEvent::Complete,
            ]
        );
        assert!(!root.join("dir_20230130-010000").exists());
        assert!(root.join("dir_20230131-010000/a.png").exists());
    }

    #[tokio::test]
    async fn test_incomplete_policy_cleans_nothing() {
        let (mock, backend) = mock(&["backup_20230101-000000.sql", "backup_20230102-000000.sql"]);
        let counts = RetentionCounts {
            monthly: Some(1),
            weekly: None,
            daily: None,
        };
        let events = collect(&backend, ArtifactKind::Database, counts).await;
        assert_eq!(
            events,
            vec![PruneEvent::Started, PruneEvent::Skipped(Granularity::Weekly), PruneEvent::Complete]
        );
        assert_eq!(mock.paths().await.len(), 2);
    }

    #[tokio::test]
    async fn test_bad_name_aborts_before_deleting() {
        let (mock, backend) = mock(&["backup_20230101-000000.sql", "backup_latest.sql"]);
        let events: Vec<_> = prune(&backend, ArtifactKind::Database, RetentionCounts::new(0, 0, 0), NOW).collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], Ok(PruneEvent::Discovered(2))));
        let err = events[2].as_ref().unwrap_err();
        assert!(matches!(&**err, ErrorKind::Policy));
        assert_eq!(mock.paths().await.len(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_deletes_nothing() {
        let (mock, backend) = mock(&["backup_20230101-000000.sql", "dir_20230101-000000/a.png"]);
        let dry_run: BackendHandle = Arc::new(ReadOnlyBackend::new(backend));
        let database = collect(&dry_run, ArtifactKind::Database, RetentionCounts::new(0, 0, 0)).await;
        let media = collect(&dry_run, ArtifactKind::Media, RetentionCounts::new(0, 0, 0)).await;
        assert!(database.contains(&PruneEvent::Removed {
            name: "backup_20230101-000000.sql".to_string(),
            files: 1
        }));
        assert!(media.contains(&PruneEvent::Removed {
            name: "dir_20230101-000000".to_string(),
            files: 1
        }));
        assert_eq!(mock.paths().await.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_is_idempotent() {
        let (mock, backend) = mock(&[
            "backup_20221215-000000.sql",
            "backup_20230110-000000.sql",
            "backup_20230120-000000.sql",
            "backup_20230130-000000.sql",
            "backup_20230131-000000.sql",
        ]);
        let counts = RetentionCounts::new(1, 2, 1);
        collect(&backend, ArtifactKind::Database, counts).await;
        let after_first = mock.paths().await;
        let events = collect(&backend, ArtifactKind::Database, counts).await;
        assert!(!events.iter().any(|event| matches!(event, PruneEvent::Removed { .. })));
        assert_eq!(mock.paths().await, after_first);
    }
}
