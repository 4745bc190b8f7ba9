//! Configuration loading and validation.
//!
//! Configuration is layered with [`figment`], lowest precedence first:
//!
//! 1. Built-in defaults (snapshot sentinel name).
//! 2. The configuration file, TOML, YAML or JSON depending on its extension.
//! 3. Environment variables prefixed `KEEPER_`, with `__` separating nested
//!    keys (`KEEPER_RETENTION__DATABASE__DAILY=7`).
//!
//! Retention counts are deliberately left optional here; a missing count is
//! reported by the retention engine when a prune actually needs it.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::OptionExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use keeper_policy::{ArtifactKind, RetentionCounts};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_FILENAME: &str = "keeper.toml";
pub const DEFAULT_SENTINEL: &str = ".complete";
pub const ENV_PREFIX: &str = "KEEPER_";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub local: LocalConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub snapshots: SnapshotConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

/// The directory backups are written to on this machine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalConfig {
    pub path: PathBuf,
}

/// Off-site copy of the backup directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum RemoteConfig {
    /// Another directory, typically a mounted network share.
    Local { path: PathBuf },
    #[cfg(feature = "s3")]
    S3(S3Config),
}

#[cfg(feature = "s3")]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub prefix: Option<String>,
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
}

/// Retention counts, independent per artifact kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    #[serde(default)]
    pub database: RetentionCounts,
    #[serde(default)]
    pub media: RetentionCounts,
}
impl RetentionConfig {
    /// Counts for one kind of artifact. Unrecognized artifacts are never
    /// retained, so they get an empty (and therefore incomplete) policy.
    pub fn counts(&self, kind: ArtifactKind) -> RetentionCounts {
        match kind {
            ArtifactKind::Database => self.database,
            ArtifactKind::Media => self.media,
            ArtifactKind::Unrecognized => RetentionCounts::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotConfig {
    /// File whose presence marks a snapshot directory as complete.
    pub sentinel: String,
}
impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            sentinel: DEFAULT_SENTINEL.to_string(),
        }
    }
}

/// Sources packed into a media archive when none are named on the command
/// line, typically the site's media root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub directories: Vec<PathBuf>,
}

impl Config {
    /// Load configuration from `path`, or from the platform default location
    /// when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_path()?,
        };
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path));
        }
        tracing::debug!(path = %path.display(), "Loading configuration");
        Self::from_figment(&figment(&path)?)
    }

    /// Extract and validate a configuration from an already-built figment.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().map_err(|e| ErrorKind::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.local.path.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(self.local.path.clone()));
        }
        if let Some(RemoteConfig::Local { path }) = &self.remote
            && !path.is_absolute()
        {
            exn::bail!(ErrorKind::InvalidPath(path.clone()));
        }
        if let Some(path) = self.archive.directories.iter().find(|path| !path.is_absolute()) {
            exn::bail!(ErrorKind::InvalidPath(path.clone()));
        }
        // The sentinel is looked up directly inside each snapshot directory.
        let mut components = Path::new(&self.snapshots.sentinel).components();
        if !matches!((components.next(), components.next()), (Some(Component::Normal(_)), None)) {
            exn::bail!(ErrorKind::Invalid(format!(
                "snapshot sentinel must be a plain file name, got `{}`",
                self.snapshots.sentinel
            )));
        }
        Ok(())
    }
}

/// `keeper.toml` inside the platform configuration directory.
pub fn default_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "keeper")
        .ok_or_raise(|| ErrorKind::Invalid("could not determine a home directory".to_string()))?;
    Ok(dirs.config_dir().join(DEFAULT_FILENAME))
}

/// Build the layered figment for a configuration file.
pub fn figment(path: &Path) -> Result<Figment> {
    let defaults = Figment::new().merge(Serialized::default("snapshots.sentinel", DEFAULT_SENTINEL));
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    let figment = match extension.as_deref() {
        Some("toml") => defaults.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => defaults.merge(Yaml::file_exact(path)),
        Some("json") => defaults.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::Invalid(format!(
            "unsupported configuration format: {} (expected .toml, .yaml or .json)",
            path.display()
        ))),
    };
    Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
}
