//! keeper - tiered retention for database and media backups

mod cli;
mod error;
mod logging;

use crate::cli::{Cli, Command, Location, kinds, local_mode};
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::{OptionExt, ResultExt};
use futures::{Stream, StreamExt};
use keeper_config::{Config, RemoteConfig};
use keeper_policy::ArtifactKind;
use keeper_rotation::{
    CompressEvent, PruneEvent, PushEvent, SweepEvent, archive_directories, compress_dumps, fetch_latest, prune, push,
    sweep,
};
use keeper_storage::BackendHandle;
use keeper_storage::backend::{LocalBackend, ReadOnlyBackend};
use std::pin::pin;
use std::process::ExitCode;
use std::sync::Arc;
use time::{OffsetDateTime, PrimitiveDateTime};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);
    // The local offset can only be read reliably while the process is still
    // single-threaded, so before the runtime starts.
    let now = local_now();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Could not start async runtime");
            return ExitCode::FAILURE;
        },
    };
    match runtime.block_on(run(cli, now)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:?}");
            ExitCode::FAILURE
        },
    }
}

/// Wall-clock time in the local timezone, as artifact names record it.
fn local_now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| {
        tracing::warn!("Could not determine the local UTC offset, using UTC");
        OffsetDateTime::now_utc()
    });
    PrimitiveDateTime::new(now.date(), now.time())
}

async fn run(cli: Cli, now: PrimitiveDateTime) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let failures = match cli.command {
        Command::Prune {
            database,
            media,
            location,
            dry_run,
        } => {
            let mut failures = 0;
            for backend in targets(&config, location, dry_run)? {
                for kind in kinds(database, media) {
                    failures += run_prune(&backend, kind, &config, now).await;
                }
            }
            failures
        },
        Command::Push {
            no_local,
            delete_local,
            dry_run,
        } => {
            let local = open_local(&config, dry_run)?;
            let remote = open_remote(&config, dry_run)?.ok_or_raise(|| ErrorKind::NoRemote)?;
            run_push(&local, &remote, local_mode(no_local, delete_local)).await
        },
        Command::Archive { directories, dry_run } => {
            let directories = if directories.is_empty() { config.archive.directories.clone() } else { directories };
            if directories.is_empty() {
                exn::bail!(ErrorKind::NothingToArchive);
            }
            let local = open_local(&config, dry_run)?;
            let name = archive_directories(&local, &directories, now).await.or_raise(|| ErrorKind::Archive)?;
            println!("{name}");
            0
        },
        Command::Compress { dry_run } => run_compress(&open_local(&config, dry_run)?).await,
        Command::Fetch { media, to } => {
            let remote = open_remote(&config, false)?.ok_or_raise(|| ErrorKind::NoRemote)?;
            let destination = to.unwrap_or_else(std::env::temp_dir);
            let mut wanted = vec![ArtifactKind::Database];
            if media {
                wanted.push(ArtifactKind::Media);
            }
            for kind in wanted {
                let path = fetch_latest(&remote, kind, &destination).await.or_raise(|| ErrorKind::Fetch)?;
                println!("{}", path.display());
            }
            0
        },
        Command::Sweep { location, dry_run } => {
            let mut failures = 0;
            for backend in targets(&config, location, dry_run)? {
                failures += run_sweep(&backend, &config.snapshots.sentinel).await;
            }
            failures
        },
    };
    if failures > 0 {
        exn::bail!(ErrorKind::Failed(failures));
    }
    Ok(())
}

fn dry_run_wrap(backend: BackendHandle, dry_run: bool) -> BackendHandle {
    if dry_run { Arc::new(ReadOnlyBackend::new(backend)) } else { backend }
}

fn open_local(config: &Config, dry_run: bool) -> Result<BackendHandle> {
    let backend = LocalBackend::new("local", &config.local.path).or_raise(|| ErrorKind::Backend("local"))?;
    Ok(dry_run_wrap(Arc::new(backend), dry_run))
}

fn open_remote(config: &Config, dry_run: bool) -> Result<Option<BackendHandle>> {
    let backend: BackendHandle = match &config.remote {
        None => return Ok(None),
        Some(RemoteConfig::Local { path }) => {
            Arc::new(LocalBackend::new("remote", path).or_raise(|| ErrorKind::Backend("remote"))?)
        },
        #[cfg(feature = "s3")]
        Some(RemoteConfig::S3(s3)) => Arc::new(
            keeper_storage::backend::S3Backend::new(
                "remote",
                &s3.bucket,
                s3.prefix.clone(),
                &s3.region,
                s3.endpoint.as_deref(),
                &s3.key_id,
                &s3.key_secret,
            )
            .or_raise(|| ErrorKind::Backend("remote"))?,
        ),
    };
    Ok(Some(dry_run_wrap(backend, dry_run)))
}

/// Backends selected by `--local` / `--remote`. An explicit `--remote`
/// without a configured remote is an error; the implicit default just skips it.
fn targets(config: &Config, location: Location, dry_run: bool) -> Result<Vec<BackendHandle>> {
    let (local, remote) = location.resolve();
    let mut backends = Vec::new();
    if local {
        backends.push(open_local(config, dry_run)?);
    }
    if remote {
        match open_remote(config, dry_run)? {
            Some(backend) => backends.push(backend),
            None if location.remote => exn::bail!(ErrorKind::NoRemote),
            None => tracing::debug!("No remote configured, skipping"),
        }
    }
    Ok(backends)
}

/// Drive an event stream to completion, logging failures. Returns how many
/// items failed.
async fn drain<T>(stream: impl Stream<Item = keeper_rotation::error::Result<T>>, mut report: impl FnMut(T)) -> u64 {
    let mut stream = pin!(stream);
    let mut failures = 0;
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => report(event),
            Err(e) => {
                failures += 1;
                tracing::error!(retryable = e.is_retryable(), "{e:?}");
            },
        }
    }
    failures
}

async fn run_prune(backend: &BackendHandle, kind: ArtifactKind, config: &Config, now: PrimitiveDateTime) -> u64 {
    let (mut retained, mut removed) = (0u64, 0u64);
    drain(prune(backend, kind, config.retention.counts(kind), now), |event| match event {
        PruneEvent::Retained(name) => {
            tracing::debug!(backend = backend.name(), artifact = %name, "Keeping backup");
            retained += 1;
        },
        PruneEvent::Removed { .. } => removed += 1,
        PruneEvent::Complete => {
            tracing::info!(backend = backend.name(), %kind, retained, removed, "Prune complete");
        },
        PruneEvent::Started | PruneEvent::Skipped(_) | PruneEvent::Discovered(_) => {},
    })
    .await
}

async fn run_push(local: &BackendHandle, remote: &BackendHandle, mode: keeper_rotation::LocalMode) -> u64 {
    let (mut uploaded, mut present, mut removed) = (0u64, 0u64, 0u64);
    drain(push(local, remote, mode), |event| match event {
        PushEvent::Uploaded(_) => uploaded += 1,
        PushEvent::AlreadyPresent(_) => present += 1,
        PushEvent::RemovedLocal(path) => {
            tracing::info!(path = %path.display(), "Removed local copy");
            removed += 1;
        },
        PushEvent::Complete => {
            tracing::info!(uploaded, already_present = present, removed_local = removed, "Push complete");
        },
        PushEvent::Started | PushEvent::Discovered(_) => {},
    })
    .await
}

async fn run_compress(local: &BackendHandle) -> u64 {
    let mut compressed = 0u64;
    drain(compress_dumps(local), |event| match event {
        CompressEvent::Compressed { .. } => compressed += 1,
        CompressEvent::Complete => tracing::info!(backend = local.name(), compressed, "Compress complete"),
        CompressEvent::Started | CompressEvent::Discovered(_) => {},
    })
    .await
}

async fn run_sweep(backend: &BackendHandle, sentinel: &str) -> u64 {
    let mut swept = 0u64;
    drain(sweep(backend, sentinel), |event| match event {
        SweepEvent::Swept { .. } => swept += 1,
        SweepEvent::Complete => tracing::info!(backend = backend.name(), swept, "Sweep complete"),
        SweepEvent::Started | SweepEvent::Discovered(_) | SweepEvent::Intact(_) => {},
    })
    .await
}
