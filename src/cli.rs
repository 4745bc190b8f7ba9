use clap::{ArgAction, Args, Parser, Subcommand};
use keeper_policy::ArtifactKind;
use keeper_rotation::LocalMode;
use std::path::PathBuf;

/// Tiered retention for database dumps and media backups
#[derive(Debug, Parser)]
#[command(name = "keeper")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (default: keeper.toml in the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// More logging; repeat for more detail
    #[arg(short, long, global = true, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Remove backups the retention policy no longer keeps
    Prune {
        /// Only prune database dumps
        #[arg(long)]
        database: bool,
        /// Only prune media backups
        #[arg(long)]
        media: bool,
        #[command(flatten)]
        location: Location,
        /// Report what would be removed without removing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Copy local backups to the remote
    Push {
        /// Delete local files once uploaded
        #[arg(long, conflicts_with = "delete_local")]
        no_local: bool,
        /// Delete every local backup the remote holds
        #[arg(long)]
        delete_local: bool,
        /// Report what would be copied without copying anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Pack directories into a new media archive in the local backup directory
    Archive {
        /// Directories to pack (default: `archive.directories` from the configuration)
        directories: Vec<PathBuf>,
        /// Build the archive without writing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Gzip the uncompressed database dumps in the local backup directory
    Compress {
        /// Report what would be compressed without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Download the newest database dump from the remote, ready to restore
    Fetch {
        /// Also fetch and unpack the newest media backup
        #[arg(long)]
        media: bool,
        /// Directory to download into (default: the system temporary directory)
        #[arg(long)]
        to: Option<PathBuf>,
    },
    /// Remove media snapshot directories that never completed
    Sweep {
        #[command(flatten)]
        location: Location,
        /// Report what would be removed without removing anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Clone, Copy, Debug, Args)]
pub struct Location {
    /// Operate on the local backup directory
    #[arg(long)]
    pub local: bool,
    /// Operate on the remote
    #[arg(long)]
    pub remote: bool,
}
impl Location {
    /// With neither flag given, operate everywhere.
    pub fn resolve(self) -> (bool, bool) {
        match (self.local, self.remote) {
            (false, false) => (true, true),
            flags => flags,
        }
    }
}

/// Artifact kinds selected by `--database` / `--media`; neither means both.
pub fn kinds(database: bool, media: bool) -> Vec<ArtifactKind> {
    match (database, media) {
        (true, false) => vec![ArtifactKind::Database],
        (false, true) => vec![ArtifactKind::Media],
        _ => vec![ArtifactKind::Database, ArtifactKind::Media],
    }
}

pub fn local_mode(no_local: bool, delete_local: bool) -> LocalMode {
    match (no_local, delete_local) {
        (_, true) => LocalMode::RemoveAll,
        (true, false) => LocalMode::RemoveUploaded,
        (false, false) => LocalMode::Keep,
    }
}
