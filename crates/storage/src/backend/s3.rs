//! S3-compatible storage backend.
//!
//! This module provides a storage backend implementation for S3-compatible
//! services including AWS S3, Backblaze B2, MinIO, and others. It holds the
//! off-site copy of the backup directory.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file (`key_id`
//! and `key_secret` under `[remote]`).

use crate::{
    FileInfo, StorageBackend,
    backend::FileInfoStream,
    error::{ErrorKind, Result},
    validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, SdkError},
    primitives::{ByteStream, DateTime},
};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 32;

/// S3-compatible storage backend.
///
/// Stores files in an S3 bucket, optionally under a key prefix. All paths are
/// relative to the configured prefix (if any). Snapshot directories exist
/// only as shared key prefixes.
///
/// # Examples
///
/// ```no_run
/// use keeper_storage::backend::S3Backend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "remote",
///     "my-bucket",
///     Some("site-backups/".to_string()),
///     "us-west-004",
///     Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     "access_key_id",
///     "secret_access_key",
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 storage backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in display/logging)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - AWS region or provider-specific region (e.g., "us-west-004" for Backblaze)
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - AWS/provider access key ID
    /// * `key_secret` - AWS/provider secret access key
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix
            .map(validate_path)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p)))
            .transpose()?;
        let credentials = Credentials::new(key_id, key_secret, None, None, "keeper-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region.into()))
            // Exponential backoff: 1 initial attempt + 3 retries
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config_builder.build()),
            bucket: bucket.into(),
            prefix,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Construct the full S3 key from a relative path.
    fn full_key(&self, path: &Path) -> Result<String> {
        let validated = validate_path(path)?;
        let path_str = validated.to_str().ok_or_raise(|| ErrorKind::InvalidPath(validated.clone()))?;
        Ok(join_key(self.prefix.as_deref(), path_str))
    }

    /// Key prefix to list under: everything below the configured prefix,
    /// narrowed to `path` when given.
    fn list_key_prefix(&self, path: Option<&Path>) -> Result<Option<String>> {
        let key = match path {
            Some(path) => Some(self.full_key(path)?),
            // Trailing slash keeps sibling prefixes (`site-old/`) out of the listing.
            None => self.prefix.as_deref().map(|p| format!("{}/", p.trim_end_matches('/'))),
        };
        // Keys are listed as strings; the component-wise check happens after
        // stripping, so `dir_x` never matches `dir_x.tar.gz`.
        Ok(key)
    }

    /// Strip the configured prefix from an S3 key to get relative path.
    fn relative_path(&self, key: &str) -> Result<PathBuf> {
        validate_path(strip_key(self.prefix.as_deref(), key))
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }

    /// Convert AWS DateTime to OffsetDateTime.
    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    fn map_sdk_error<E, R>(err: SdkError<E, R>) -> ErrorKind
    where
        E: std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let message = DisplayErrorContext(&err).to_string();
        match err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => ErrorKind::Network(message),
            _ => ErrorKind::BackendError(message),
        }
    }
}

fn join_key(prefix: Option<&str>, path: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path),
        None => path.to_string(),
    }
}

fn strip_key<'a>(prefix: Option<&str>, key: &'a str) -> &'a str {
    match prefix {
        Some(prefix) => {
            key.strip_prefix(prefix.trim_end_matches('/')).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
        },
        None => key,
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        let key_prefix = match self.list_key_prefix(validated_prefix.as_deref()) {
            Ok(key_prefix) => key_prefix,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(key_prefix)
                .into_paginator()
                .send();
            loop {
                let page = {
                    let _permit = match self.acquire_permit().await {
                        Ok(permit) => permit,
                        Err(e) => { yield Err(e); break; },
                    };
                    pages.next().await
                };
                let page = match page {
                    Some(Ok(page)) => page,
                    Some(Err(e)) => { yield Err(exn::Exn::from(Self::map_sdk_error(e))); break; },
                    None => break,
                };
                for object in page.contents() {
                    // Directory placeholder objects carry no data.
                    let Some(key) = object.key().filter(|k| !k.ends_with('/')) else { continue };
                    let relative = match self.relative_path(key) {
                        Ok(relative) => relative,
                        Err(e) => { yield Err(e); continue; },
                    };
                    if validated_prefix.as_ref().is_some_and(|pfx| !relative.starts_with(pfx)) {
                        continue;
                    }
                    let modified = match object.last_modified().map(Self::parse_datetime).transpose() {
                        Ok(modified) => modified.unwrap_or(OffsetDateTime::UNIX_EPOCH),
                        Err(e) => { yield Err(e); continue; },
                    };
                    let size = u64::try_from(object.size().unwrap_or_default()).unwrap_or_default();
                    yield Ok(FileInfo::new(relative, size, modified));
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(e) => exn::bail!(Self::map_sdk_error(e)),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        let output = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            Err(e) => exn::bail!(Self::map_sdk_error(e)),
        };
        let body = output
            .body
            .collect()
            .await
            .or_raise(|| ErrorKind::Network(format!("interrupted while downloading `{key}`")))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        // S3 deletes are idempotent; check first so a missing file reports
        // NotFound like every other backend.
        if !self.exists(path).await? {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        self.client.delete_object().bucket(&self.bucket).key(&key).send().await.map_err(Self::map_sdk_error)?;
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        let output = match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|e| e.is_not_found()) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            Err(e) => exn::bail!(Self::map_sdk_error(e)),
        };
        let modified = output.last_modified().map(Self::parse_datetime).transpose()?.unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let size = u64::try_from(output.content_length().unwrap_or_default()).unwrap_or_default();
        Ok(FileInfo::new(validate_path(path)?, size, modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(prefix: Option<&str>) -> S3Backend {
        S3Backend::new(
            "remote",
            "bucket",
            prefix.map(str::to_string),
            "us-east-1",
            Some("http://localhost:9000"),
            "key",
            "secret",
        )
        .unwrap()
    }

    #[test]
    fn test_full_key_without_prefix() {
        let key = backend(None).full_key(Path::new("dir_20230101-000000/a.png")).unwrap();
        assert_eq!(key, "dir_20230101-000000/a.png");
    }

    #[test]
    fn test_full_key_with_prefix() {
        let key = backend(Some("site")).full_key(Path::new("backup_20230101-000000.sql.gz")).unwrap();
        assert_eq!(key, "site/backup_20230101-000000.sql.gz");
        let key = backend(Some("site/")).full_key(Path::new("backup_20230101-000000.sql.gz")).unwrap();
        assert_eq!(key, "site/backup_20230101-000000.sql.gz");
    }

    #[test]
    fn test_full_key_rejects_traversal() {
        assert!(backend(Some("site")).full_key(Path::new("../other/backup.sql")).is_err());
    }

    #[test]
    fn test_prefix_is_validated() {
        assert!(
            S3Backend::new("remote", "bucket", Some("../up".to_string()), "us-east-1", None::<String>, "k", "s").is_err()
        );
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            backend(None).relative_path("dir_20230101-000000/a.png").unwrap(),
            PathBuf::from("dir_20230101-000000/a.png")
        );
        assert_eq!(
            backend(Some("site/")).relative_path("site/backup_20230101-000000.sql").unwrap(),
            PathBuf::from("backup_20230101-000000.sql")
        );
    }

    #[test]
    fn test_list_key_prefix() {
        assert_eq!(backend(None).list_key_prefix(None).unwrap(), None);
        assert_eq!(backend(Some("site/")).list_key_prefix(None).unwrap(), Some("site/".to_string()));
        assert_eq!(backend(Some("site")).list_key_prefix(None).unwrap(), Some("site/".to_string()));
        // Sibling keys sharing the string prefix fall outside the listing.
        let key_prefix = backend(Some("site")).list_key_prefix(None).unwrap().unwrap();
        assert!(!"site-old/backup_20230101-000000.sql".starts_with(&key_prefix));
        assert!("site/backup_20230101-000000.sql".starts_with(&key_prefix));
        assert_eq!(
            backend(Some("site")).list_key_prefix(Some(Path::new("dir_20230101-000000"))).unwrap(),
            Some("site/dir_20230101-000000".to_string())
        );
    }

    #[test]
    fn test_join_and_strip_key() {
        assert_eq!(join_key(Some("a/"), "b"), "a/b");
        assert_eq!(strip_key(Some("a"), "a/b/c"), "b/c");
        assert_eq!(strip_key(Some("a"), "other/c"), "other/c");
        assert_eq!(strip_key(None, "b"), "b");
    }
}
