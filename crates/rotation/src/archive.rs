//! Producing backup artifacts: media archives and compressed dumps.
//!
//! Both are built in memory on a blocking thread and then written through a
//! [`BackendHandle`], so a dry run only has to swap in a read-only backend.

use crate::error::{ErrorKind, Result};
use crate::listing::discover;
use async_stream::stream;
use exn::{OptionExt, ResultExt};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use futures::Stream;
use keeper_policy::{ArtifactKind, artifact_name};
use keeper_storage::BackendHandle;
use std::io::Write;
use std::path::{Path, PathBuf};
use time::PrimitiveDateTime;

/// Storage space matters more than speed for backups.
const GZIP_LEVEL: Compression = Compression::best();
pub(crate) const GZIP_SUFFIX: &str = ".gz";
pub(crate) const TAR_GZ_SUFFIX: &str = ".tar.gz";

/// Pack `directories` into a single `dir_<now>.tar.gz` media archive in
/// `backend`, returning the artifact name.
///
/// Each directory is stored under its own final path component, so
/// `/srv/site/media` unpacks as `media/`. Symlinks are stored as links.
///
/// # Errors
/// - [`ErrorKind::NotADirectory`] if any source is not a directory.
/// - [`ErrorKind::AlreadyExists`] if an archive for `now` is already there.
/// - [`ErrorKind::Archive`] if reading the sources fails.
#[tracing::instrument(level = "info", skip(backend, directories), fields(backend = backend.name()))]
pub async fn archive_directories(
    backend: &BackendHandle,
    directories: &[PathBuf],
    now: PrimitiveDateTime,
) -> Result<String> {
    let name = artifact_name(ArtifactKind::Media, now, TAR_GZ_SUFFIX).ok_or_raise(|| ErrorKind::Archive)?;
    if directories.is_empty() {
        exn::bail!(ErrorKind::Archive);
    }
    for directory in directories {
        if !directory.is_dir() {
            exn::bail!(ErrorKind::NotADirectory(directory.clone()));
        }
    }
    if backend.exists(Path::new(&name)).await.or_raise(|| ErrorKind::Storage)? {
        exn::bail!(ErrorKind::AlreadyExists(name));
    }

    let sources = directories.to_vec();
    let data = tokio::task::spawn_blocking(move || tar_gz(&sources)).await.or_raise(|| ErrorKind::Archive)??;
    backend.write(Path::new(&name), &data).await.or_raise(|| ErrorKind::Storage)?;
    tracing::info!(artifact = %name, bytes = data.len(), directories = directories.len(), "Archived directories");
    Ok(name)
}

fn tar_gz(directories: &[PathBuf]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), GZIP_LEVEL));
    builder.follow_symlinks(false);
    for directory in directories {
        let name = directory.file_name().ok_or_raise(|| ErrorKind::NotADirectory(directory.clone()))?;
        builder.append_dir_all(name, directory).or_raise(|| ErrorKind::Archive)?;
    }
    let encoder = builder.into_inner().or_raise(|| ErrorKind::Archive)?;
    encoder.finish().or_raise(|| ErrorKind::Archive)
}

/// Unpack a `.tar.gz` archive into `target`, creating it if needed.
pub(crate) async fn untar_gz(data: Vec<u8>, target: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&target).or_raise(|| ErrorKind::Io)?;
        tar::Archive::new(GzDecoder::new(data.as_slice())).unpack(&target).or_raise(|| ErrorKind::Decompress)
    })
    .await
    .or_raise(|| ErrorKind::Decompress)?
}

pub(crate) fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), GZIP_LEVEL);
    encoder.write_all(data).or_raise(|| ErrorKind::Archive)?;
    encoder.finish().or_raise(|| ErrorKind::Archive)
}

/// Progress events emitted by [`compress_dumps`], in the order `Started`,
/// `Discovered`, one `Compressed` per dump, `Complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressEvent {
    Started,
    /// Number of uncompressed database dumps found.
    Discovered(u64),
    /// `from` was replaced by its gzipped copy `to`.
    Compressed { from: String, to: String },
    Complete,
}

/// Streams [`CompressEvent`]s while gzipping every uncompressed database
/// dump in `backend`. Each dump is replaced by `<name>.gz`; the original is
/// only deleted once the compressed copy has been written.
pub fn compress_dumps<'a>(backend: &'a BackendHandle) -> impl Stream<Item = Result<CompressEvent>> + 'a {
    stream!({
        yield Ok(CompressEvent::Started);

        let dumps: Vec<String> = match discover(backend.as_ref(), Some(ArtifactKind::Database)).await.or_raise(|| ErrorKind::Storage) {
            Ok(entries) => entries
                .into_iter()
                .filter(|entry| !entry.is_directory() && !entry.name.ends_with(GZIP_SUFFIX))
                .map(|entry| entry.name)
                .collect(),
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        yield Ok(CompressEvent::Discovered(dumps.len() as u64));

        for dump in dumps {
            yield compress_dump(backend, dump).await;
        }

        yield Ok(CompressEvent::Complete);
    })
}

async fn compress_dump(backend: &BackendHandle, name: String) -> Result<CompressEvent> {
    let compressed = format!("{name}{GZIP_SUFFIX}");
    let data = backend.read(Path::new(&name)).await.or_raise(|| ErrorKind::Storage)?;
    let size = data.len();
    let data = tokio::task::spawn_blocking(move || gzip(&data)).await.or_raise(|| ErrorKind::Archive)??;
    backend.write(Path::new(&compressed), &data).await.or_raise(|| ErrorKind::Storage)?;
    backend.delete(Path::new(&name)).await.or_raise(|| ErrorKind::Storage)?;
    tracing::info!(from = %name, to = %compressed, size, compressed_size = data.len(), "Compressed dump");
    Ok(CompressEvent::Compressed { from: name, to: compressed })
}
