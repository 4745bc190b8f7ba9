//! Download the newest backup of a kind, ready to be restored.

use crate::archive::{GZIP_SUFFIX, TAR_GZ_SUFFIX, untar_gz};
use crate::error::{ErrorKind, Result};
use crate::listing::discover;
use exn::ResultExt;
use flate2::read::GzDecoder;
use keeper_policy::ArtifactKind;
use keeper_storage::BackendHandle;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Download the newest `kind` artifact from `backend` into `destination`.
///
/// The newest artifact is the last one in ascending name order. Gzipped
/// files are decompressed and written without their `.gz` suffix, so
/// `backup_20230101-000000.sql.gz` lands as `backup_20230101-000000.sql`.
/// Media archives are unpacked, `dir_20230101-000000.tar.gz` into the
/// directory `dir_20230101-000000/`. Snapshot directories are copied file by
/// file. Returns the local path of
/// the fetched artifact.
///
/// # Errors
/// - [`ErrorKind::NothingToFetch`] if the backend holds no `kind` artifact.
/// - [`ErrorKind::Decompress`] if a `.gz` payload is corrupt.
/// - [`ErrorKind::Storage`] / [`ErrorKind::Io`] for failed reads and writes.
#[tracing::instrument(level = "info", skip(backend), fields(backend = backend.name()))]
pub async fn fetch_latest(backend: &BackendHandle, kind: ArtifactKind, destination: &Path) -> Result<PathBuf> {
    let entries = discover(backend.as_ref(), Some(kind)).await.or_raise(|| ErrorKind::Storage)?;
    // A directory with no files is a broken snapshot, nothing to restore.
    let Some(latest) = entries.into_iter().rev().find(|entry| !entry.files.is_empty()) else {
        exn::bail!(ErrorKind::NothingToFetch(kind));
    };

    if latest.is_directory() {
        let target = destination.join(&latest.name);
        for file in &latest.files {
            let data = backend.read(&file.path).await.or_raise(|| ErrorKind::Storage)?;
            write(&destination.join(&file.path), &data).await?;
        }
        tracing::info!(artifact = %latest.name, files = latest.files.len(), "Fetched snapshot");
        return Ok(target);
    }

    let data = backend.read(Path::new(&latest.name)).await.or_raise(|| ErrorKind::Storage)?;
    if let Some(stem) = latest.name.strip_suffix(TAR_GZ_SUFFIX) {
        let target = destination.join(stem);
        untar_gz(data, target.clone()).await?;
        tracing::info!(artifact = %latest.name, path = %target.display(), "Unpacked media archive");
        return Ok(target);
    }
    let (target, data) = match latest.name.strip_suffix(GZIP_SUFFIX) {
        Some(stem) => (destination.join(stem), gunzip(&data)?),
        None => (destination.join(&latest.name), data),
    };
    write(&target, &data).await?;
    tracing::info!(artifact = %latest.name, path = %target.display(), bytes = data.len(), "Fetched backup");
    Ok(target)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(data).read_to_end(&mut decoded).or_raise(|| ErrorKind::Decompress)?;
    Ok(decoded)
}

async fn write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io)?;
    }
    fs::write(path, data).await.or_raise(|| ErrorKind::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use keeper_storage::backend::{LocalBackend, MockBackend};
    use std::io::Write;
    use std::sync::Arc;
    use time::macros::datetime;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn backend() -> BackendHandle {
        Arc::new(MockBackend::with_files([
            ("backup_20230101-000000.sql.gz", gzip(b"old dump")),
            ("backup_20230102-000000.sql.gz", gzip(b"CREATE TABLE t;")),
            ("dir_20230101-000000.tar.gz", b"tarball".to_vec()),
            ("dir_20230102-000000/a.png", b"png".to_vec()),
            ("dir_20230102-000000/sub/b.png", b"png2".to_vec()),
            ("zzz_notes.txt", b"ignored".to_vec()),
        ]))
    }

    #[tokio::test]
    async fn test_fetch_latest_database_gunzips() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = fetch_latest(&backend(), ArtifactKind::Database, temp_dir.path()).await.unwrap();
        assert_eq!(path, temp_dir.path().join("backup_20230102-000000.sql"));
        assert_eq!(std::fs::read(&path).unwrap(), b"CREATE TABLE t;");
    }

    #[tokio::test]
    async fn test_fetch_latest_media_snapshot() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = fetch_latest(&backend(), ArtifactKind::Media, temp_dir.path()).await.unwrap();
        assert_eq!(path, temp_dir.path().join("dir_20230102-000000"));
        assert_eq!(std::fs::read(path.join("a.png")).unwrap(), b"png");
        assert_eq!(std::fs::read(path.join("sub/b.png")).unwrap(), b"png2");
    }

    #[tokio::test]
    async fn test_fetch_latest_media_archive_unpacks() {
        let sources = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(sources.path().join("media/uploads")).unwrap();
        std::fs::write(sources.path().join("media/uploads/a.png"), b"png").unwrap();
        let backend: BackendHandle = Arc::new(MockBackend::with_files([
            ("dir_20230101-000000.tar.gz", b"older".to_vec()),
            ("backup_20230103-000000.sql", b"dump".to_vec()),
        ]));
        let name = crate::archive_directories(&backend, &[sources.path().join("media")], datetime!(2023-01-02 00:00))
            .await
            .unwrap();
        assert_eq!(name, "dir_20230102-000000.tar.gz");

        let temp_dir = tempfile::tempdir().unwrap();
        let path = fetch_latest(&backend, ArtifactKind::Media, temp_dir.path()).await.unwrap();
        assert_eq!(path, temp_dir.path().join("dir_20230102-000000"));
        assert_eq!(std::fs::read(path.join("media/uploads/a.png")).unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_fetch_plain_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend: BackendHandle = Arc::new(MockBackend::with_files([("backup_20230101-000000.sql", b"dump")]));
        let path = fetch_latest(&backend, ArtifactKind::Database, temp_dir.path()).await.unwrap();
        assert_eq!(path, temp_dir.path().join("backup_20230101-000000.sql"));
        assert_eq!(std::fs::read(&path).unwrap(), b"dump");
    }

    #[tokio::test]
    async fn test_nothing_to_fetch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend: BackendHandle = Arc::new(MockBackend::with_names(["dir_20230101-000000.tar.gz"]));
        let err = fetch_latest(&backend, ArtifactKind::Database, temp_dir.path()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NothingToFetch(ArtifactKind::Database)));
    }

    #[tokio::test]
    async fn test_fetch_skips_empty_snapshot_directory() {
        let remote_dir = tempfile::tempdir().unwrap();
        std::fs::write(remote_dir.path().join("dir_20230101-000000.tar.gz"), b"archive").unwrap();
        std::fs::create_dir(remote_dir.path().join("dir_20230102-000000")).unwrap();
        let backend: BackendHandle = Arc::new(LocalBackend::new("remote", remote_dir.path()).unwrap());
        let temp_dir = tempfile::tempdir().unwrap();
        // The archive is the newest artifact with content; it is not a valid tarball.
        let err = fetch_latest(&backend, ArtifactKind::Media, temp_dir.path()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Decompress));
        assert!(!temp_dir.path().join("dir_20230102-000000").exists());
    }

    #[tokio::test]
    async fn test_corrupt_gzip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend: BackendHandle =
            Arc::new(MockBackend::with_files([("backup_20230101-000000.sql.gz", b"not gzip at all")]));
        let err = fetch_latest(&backend, ArtifactKind::Database, temp_dir.path()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Decompress));
        assert!(!temp_dir.path().join("backup_20230101-000000.sql").exists());
    }
}
