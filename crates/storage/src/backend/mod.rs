//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for storage operations across different backends (the local
//! backup directory, S3-compatible remotes, etc.).

mod local;
#[cfg(feature = "mock")]
mod mock;
mod ro;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
pub use self::ro::ReadOnlyBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::Result;
use crate::file::{FileInfo, TopLevelEntry};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::collections::BTreeMap;
use std::path::Path;
use std::pin::Pin;

type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Unified interface for storage backends.
///
/// All storage operations are asynchronous to efficiently handle network
/// operations and concurrent access. The trait supports both local filesystem
/// and remote storage backends.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations should
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use keeper_storage::{backend::StorageBackend, error::Result};
///
/// async fn dump_size(backend: &dyn StorageBackend) -> Result<u64> {
///     let path = Path::new("backup_20230101-000000.sql.gz");
///     if backend.exists(path).await? {
///         Ok(backend.stat(path).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (`local`, `remote`, ...). Used for
    /// logging only; uniqueness is not enforced.
    fn name(&self) -> &str;

    /// List all files matching an optional prefix.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream file metadata matching an optional prefix.
    ///
    /// Returns metadata for every file (never directories) in the backend,
    /// recursively. If a prefix is provided, only files whose paths start
    /// with the prefix (component-wise) are returned. Order is unspecified.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use keeper_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    ///
    /// // Everything inside one snapshot directory
    /// let mut snapshot = backend.list_stream(Some(Path::new("dir_20230101-000000")));
    /// while let Some(info) = snapshot.try_next().await? {
    ///     println!("{}: {} bytes", info.path.display(), info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// List the entries directly below the root, sorted by name.
    ///
    /// Default implementation derives the entries from a full listing, so it
    /// only sees directories holding at least one file. That is all an object
    /// store has; backends with real directories should override it so that
    /// empty directories show up too.
    async fn list_top_level(&self) -> Result<Vec<TopLevelEntry>> {
        let mut entries: BTreeMap<String, bool> = BTreeMap::new();
        for file in self.list(None).await? {
            if let Some(name) = file.artifact_name() {
                *entries.entry(name.to_string()).or_default() |= file.is_nested();
            }
        }
        Ok(entries.into_iter().map(|(name, is_dir)| TopLevelEntry { name, is_dir }).collect())
    }

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents.
    ///
    /// Creates a new file or overwrites an existing file with the provided
    /// data. Implementations should create parent directories as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Delete every file under `prefix` (a snapshot directory), returning
    /// how many files were removed.
    ///
    /// Default implementation lists the prefix and deletes file by file;
    /// backends with real directories should also remove the directory.
    async fn delete_prefix(&self, prefix: &Path) -> Result<u64> {
        let mut deleted = 0;
        for file in self.list(Some(prefix)).await? {
            self.delete(&file.path).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Get file metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
