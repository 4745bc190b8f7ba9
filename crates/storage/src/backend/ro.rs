//! Readonly storage backend used for dry runs.
//!
//! Wraps another backend and prevents write operations from executing, but
//! indicates success on return. Listings still come from the wrapped backend
//! so a dry run reports exactly what a real run would touch.

use async_trait::async_trait;
use std::path::Path;

use crate::{
    BackendHandle, StorageBackend,
    backend::FileInfoStream,
    error::Result,
    file::{FileInfo, TopLevelEntry},
};

/// Read-only storage backend.
///
/// Wraps another backend and silently drops all write operations, logging an
/// [`info event`](tracing::Event).
#[derive(Clone)]
pub struct ReadOnlyBackend {
    inner: BackendHandle,
}
impl ReadOnlyBackend {
    pub fn new(inner: BackendHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl StorageBackend for ReadOnlyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        self.inner.list_stream(prefix)
    }

    async fn list_top_level(&self) -> Result<Vec<TopLevelEntry>> {
        self.inner.list_top_level().await
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        tracing::info!(backend = self.name(), path = %path.display(), bytes = data.len(), "Skipping write during dry run");
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        tracing::info!(backend = self.name(), path = %path.display(), "Skipping delete during dry run");
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &Path) -> Result<u64> {
        // Report what would have gone, so callers' counts stay meaningful.
        let count = self.inner.list(Some(prefix)).await?.len() as u64;
        tracing::info!(backend = self.name(), path = %prefix.display(), files = count, "Skipping directory delete during dry run");
        Ok(count)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        self.inner.stat(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use std::sync::Arc;

    fn setup() -> (tempfile::TempDir, BackendHandle, ReadOnlyBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let inner: BackendHandle = Arc::new(LocalBackend::new("local", temp_dir.path()).unwrap());
        let ro = ReadOnlyBackend::new(inner.clone());
        (temp_dir, inner, ro)
    }

    #[tokio::test]
    async fn test_writes_are_dropped() {
        let (_dir, inner, ro) = setup();
        ro.write(Path::new("backup.sql"), b"data").await.unwrap();
        assert!(!inner.exists(Path::new("backup.sql")).await.unwrap());
    }

    #[tokio::test]
    async fn test_deletes_are_dropped() {
        let (_dir, inner, ro) = setup();
        inner.write(Path::new("backup.sql"), b"data").await.unwrap();
        inner.write(Path::new("dir_20230101-000000/a.png"), b"a").await.unwrap();
        inner.write(Path::new("dir_20230101-000000/b.png"), b"b").await.unwrap();
        ro.delete(Path::new("backup.sql")).await.unwrap();
        assert_eq!(ro.delete_prefix(Path::new("dir_20230101-000000")).await.unwrap(), 2);
        assert!(inner.exists(Path::new("backup.sql")).await.unwrap());
        assert_eq!(inner.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_reads_pass_through() {
        let (_dir, inner, ro) = setup();
        inner.write(Path::new("backup.sql"), b"data").await.unwrap();
        assert_eq!(ro.read(Path::new("backup.sql")).await.unwrap(), b"data");
        assert_eq!(ro.stat(Path::new("backup.sql")).await.unwrap().size, 4);
        assert_eq!(ro.list(None).await.unwrap().len(), 1);
        assert_eq!(ro.list_top_level().await.unwrap(), inner.list_top_level().await.unwrap());
        assert_eq!(ro.name(), "local");
    }
}
