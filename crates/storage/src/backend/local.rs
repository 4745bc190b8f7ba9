//! Local filesystem storage backend.
//!
//! This module provides a storage backend implementation for the local filesystem.
//! Files are stored in a configured directory and accessed using standard filesystem
//! operations via `tokio::fs` for async I/O.

use crate::backend::FileInfoStream;
use crate::error::ErrorKind;
use crate::{FileInfo, StorageBackend, TopLevelEntry, error::Result, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// Stores files in a directory on the local filesystem. All paths are relative
/// to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use keeper_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/var/backups/site")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Backup directory
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend, creating `root` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPath`](ErrorKind::InvalidPath) if the path is not
    /// absolute or exists but is not a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }

        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Use non-async here; it'll only happen once on startup and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }

        Ok(Self { name: name.into(), root })
    }

    /// Get the absolute path for a relative storage path.
    ///
    /// Validates the path and joins it with the root directory.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    /// Convert an absolute path back to a relative storage path.
    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        if !absolute.is_absolute() {
            exn::bail!(ErrorKind::BackendError(format!(
                "attempting to get relative path of non-absolute path `{:?}`",
                absolute
            )))
        }
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{:?}` is not within root `{:?}`", absolute, self.root))
        })?;
        validate_path(relative)
    }

    fn metadata(path: &Path, metadata: Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?;
        Ok(FileInfo::new(path, metadata.len(), modified))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Classify one directory entry. Lives outside the stream so errors can
    /// use `?`; inside `stream!` they have to be yielded by hand.
    async fn process_entry(&self, entry: DirEntry, prefix: Option<&Path>) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        let relative = self.relative_path(&path)?;
        if let Some(pfx) = prefix
            && !relative.starts_with(pfx)
            && !pfx.starts_with(&relative)
        {
            return Ok(WalkEntry::Skip);
        }
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        if metadata.is_file() && prefix.is_none_or(|pfx| relative.starts_with(pfx)) {
            return Ok(WalkEntry::File(Self::metadata(&relative, metadata)?));
        }
        // Note: silently drop what is most likely a broken symlink.
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };

        // Walk from the parent directory of the prefix path. Avoids erroring
        // on prefixes where the leaf component doesn't exist yet or is a file.
        // The prefix "dir_20230101-000000" starts from the root and matches:
        // - [MATCH] "dir_20230101-000000/uploads/a.png"
        // - [MATCH] "dir_20230101-000000" (could be file)
        // - [NOT MATCH] "dir_20230101-000000.tar.gz" (Path::starts_with is component-based)
        let start_dir = validated_prefix
            .as_ref()
            .map(|prefix| self.root.join(prefix).parent().unwrap_or(&self.root).to_path_buf())
            .unwrap_or_else(|| self.root.clone());
        let mut stack = vec![start_dir];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // Consistent with S3-compatible backends: listing a
                    // directory that doesn't exist is an empty list.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry, validated_prefix.as_deref()).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn list_top_level(&self) -> Result<Vec<TopLevelEntry>> {
        let mut dir = fs::read_dir(&self.root).await.map_err(|e| Self::map_io_error(e, &self.root))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| Self::map_io_error(e, &self.root))? {
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(backend = %self.name, path = %entry.path().display(), "Skipping non UTF-8 entry");
                continue;
            };
            let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &entry.path()))?;
            if metadata.is_dir() || metadata.is_file() {
                entries.push(TopLevelEntry {
                    name,
                    is_dir: metadata.is_dir(),
                });
            }
        }
        entries.sort();
        Ok(entries)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        // Create parent directories if needed, to keep behaviour
        // consistent with S3-compatible storage.
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(fs::write(&abs_path, data).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::remove_file(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn delete_prefix(&self, prefix: &Path) -> Result<u64> {
        let abs_path = self.absolute_path(prefix)?;
        let metadata = match fs::symlink_metadata(&abs_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => exn::bail!(Self::map_io_error(e, prefix)),
        };
        if !metadata.is_dir() {
            self.delete(prefix).await?;
            return Ok(1);
        }
        let count = u64::try_from(self.list(Some(prefix)).await?.len()).unwrap_or(u64::MAX);
        fs::remove_dir_all(&abs_path).await.map_err(|e| Self::map_io_error(e, prefix))?;
        Ok(count)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Self::metadata(&validate_path(path)?, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("local", temp_dir.path()).unwrap();
        (temp_dir, backend)
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("local", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("local", "relative/path").is_err());
        assert!(LocalBackend::new("local", "./relative").is_err());
    }

    #[test]
    fn test_new_creates_missing_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("backups/site");
        let backend = LocalBackend::new("local", &root).unwrap();
        assert!(root.is_dir());
        assert_eq!(backend.absolute_path(Path::new("backup.sql")).unwrap(), root.join("backup.sql"));
    }

    #[test]
    fn test_new_rejects_file_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("not-a-dir");
        std::fs::write(&file, b"data").unwrap();
        assert!(LocalBackend::new("local", &file).is_err());
    }

    #[test]
    fn test_absolute_and_relative_path() {
        let (temp_dir, backend) = backend();
        let expected = temp_dir.path().join("backup_20230101-000000.sql");
        assert_eq!(backend.absolute_path(Path::new("backup_20230101-000000.sql")).unwrap(), expected);
        assert!(backend.absolute_path(Path::new("../etc/passwd")).is_err());
        assert_eq!(backend.relative_path(&expected).unwrap(), Path::new("backup_20230101-000000.sql"));
        assert!(backend.relative_path(Path::new("/other/file.sql")).is_err());
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("backup_20230101-000000.sql"), b"CREATE TABLE").await.unwrap();
        let data = backend.read(Path::new("backup_20230101-000000.sql")).await.unwrap();
        assert_eq!(data, b"CREATE TABLE");
    }

    #[tokio::test]
    async fn test_write_creates_directories() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("dir_20230101-000000/uploads/a.png"), b"png").await.unwrap();
        assert!(backend.exists(Path::new("dir_20230101-000000/uploads/a.png")).await.unwrap());
    }

    #[tokio::test]
    async fn test_exists() {
        let (_temp_dir, backend) = backend();
        assert!(!backend.exists(Path::new("backup.sql")).await.unwrap());
        backend.write(Path::new("backup.sql"), b"data").await.unwrap();
        assert!(backend.exists(Path::new("backup.sql")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("backup.sql"), b"data").await.unwrap();
        backend.delete(Path::new("backup.sql")).await.unwrap();
        assert!(!backend.exists(Path::new("backup.sql")).await.unwrap());
        let err = backend.delete(Path::new("backup.sql")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_prefix_removes_directory() {
        let (temp_dir, backend) = backend();
        backend.write(Path::new("dir_20230101-000000/a.png"), b"a").await.unwrap();
        backend.write(Path::new("dir_20230101-000000/sub/b.png"), b"b").await.unwrap();
        backend.write(Path::new("dir_20230101-000000.tar.gz"), b"c").await.unwrap();
        assert_eq!(backend.delete_prefix(Path::new("dir_20230101-000000")).await.unwrap(), 2);
        assert!(!temp_dir.path().join("dir_20230101-000000").exists());
        assert!(backend.exists(Path::new("dir_20230101-000000.tar.gz")).await.unwrap());
        // Already gone
        assert_eq!(backend.delete_prefix(Path::new("dir_20230101-000000")).await.unwrap(), 0);
        // A plain file counts as one
        assert_eq!(backend.delete_prefix(Path::new("dir_20230101-000000.tar.gz")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stat() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("backup.sql.gz"), b"12345").await.unwrap();
        let info = backend.stat(Path::new("./backup.sql.gz")).await.unwrap();
        assert_eq!(info.path, PathBuf::from("backup.sql.gz"));
        assert_eq!(info.size, 5);
    }

    #[tokio::test]
    async fn test_list() {
        let (_temp_dir, backend) = backend();
        assert!(backend.list(None).await.unwrap().is_empty());
        backend.write(Path::new("backup_20230101-000000.sql"), b"a").await.unwrap();
        backend.write(Path::new("dir_20230101-000000.tar.gz"), b"b").await.unwrap();
        backend.write(Path::new("dir_20230102-000000/a.png"), b"c").await.unwrap();
        backend.write(Path::new("dir_20230102-000000/.complete"), b"").await.unwrap();
        let mut paths: Vec<_> = backend.list(None).await.unwrap().into_iter().map(|f| f.path).collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("backup_20230101-000000.sql"),
                PathBuf::from("dir_20230101-000000.tar.gz"),
                PathBuf::from("dir_20230102-000000/.complete"),
                PathBuf::from("dir_20230102-000000/a.png"),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let (_temp_dir, backend) = backend();
        backend.write(Path::new("dir_20230101-000000/a.png"), b"a").await.unwrap();
        backend.write(Path::new("dir_20230101-000000/sub/b.png"), b"b").await.unwrap();
        backend.write(Path::new("dir_20230101-000000.tar.gz"), b"c").await.unwrap();
        backend.write(Path::new("media/nested/c.png"), b"d").await.unwrap();
        let mut paths: Vec<_> =
            backend.list(Some(Path::new("dir_20230101-000000"))).await.unwrap().into_iter().map(|f| f.path).collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![PathBuf::from("dir_20230101-000000/a.png"), PathBuf::from("dir_20230101-000000/sub/b.png")]
        );
        let files = backend.list(Some(Path::new("media/nested"))).await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_list_top_level_includes_empty_directories() {
        let (temp_dir, backend) = backend();
        backend.write(Path::new("backup_20230101-000000.sql"), b"a").await.unwrap();
        backend.write(Path::new("dir_20230102-000000/a.png"), b"b").await.unwrap();
        std::fs::create_dir(temp_dir.path().join("dir_20230103-000000")).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("dir_20230104-000000/uploads")).unwrap();

        // A full listing only sees files.
        assert_eq!(backend.list(None).await.unwrap().len(), 2);
        assert_eq!(
            backend.list_top_level().await.unwrap(),
            vec![
                TopLevelEntry {
                    name: "backup_20230101-000000.sql".to_string(),
                    is_dir: false
                },
                TopLevelEntry {
                    name: "dir_20230102-000000".to_string(),
                    is_dir: true
                },
                TopLevelEntry {
                    name: "dir_20230103-000000".to_string(),
                    is_dir: true
                },
                TopLevelEntry {
                    name: "dir_20230104-000000".to_string(),
                    is_dir: true
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_prefix_removes_empty_directory() {
        let (temp_dir, backend) = backend();
        std::fs::create_dir_all(temp_dir.path().join("dir_20230101-000000/uploads")).unwrap();
        assert_eq!(backend.delete_prefix(Path::new("dir_20230101-000000")).await.unwrap(), 0);
        assert!(!temp_dir.path().join("dir_20230101-000000").exists());
    }

    #[tokio::test]
    async fn test_list_nonexistent_prefix() {
        let (_temp_dir, backend) = backend();
        let files = backend.list(Some(Path::new("nonexistent/"))).await.unwrap();
        assert_eq!(files.len(), 0);
    }

    #[tokio::test]
    async fn test_path_security() {
        let (_temp_dir, backend) = backend();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.read(Path::new("etc/../../passwd")).await.is_err());
        assert!(backend.write(Path::new("../etc/passwd"), b"data").await.is_err());
        assert!(backend.delete(Path::new("../../file")).await.is_err());
        assert!(backend.delete_prefix(Path::new("..")).await.is_err());
    }
}
