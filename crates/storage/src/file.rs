//! File metadata returned by storage backends.

use std::path::{Component, Path, PathBuf};
use time::OffsetDateTime;

/// File metadata returned by storage backends.
///
/// Backup artifacts live at the top level of a backend: either a file
/// (`backup_20230101-000000.sql.gz`) or a snapshot directory whose files
/// are listed individually (`dir_20230101-000000/uploads/a.png`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: impl Into<OffsetDateTime>) -> Self {
        Self {
            path: path.into(),
            size,
            modified: modified.into(),
        }
    }

    /// Name of the top-level entry this file belongs to, i.e. the artifact name.
    pub fn artifact_name(&self) -> Option<&str> {
        top_level(&self.path)
    }

    /// Whether this file sits inside a directory artifact rather than being
    /// the artifact itself.
    pub fn is_nested(&self) -> bool {
        self.path.components().nth(1).is_some()
    }
}

/// An entry directly below the storage root.
///
/// Unlike [`FileInfo`], this also covers directories holding no files at all,
/// which is what an interrupted snapshot copy tends to leave behind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TopLevelEntry {
    pub name: String,
    pub is_dir: bool,
}

/// First normal component of a relative path, if it is valid UTF-8.
pub(crate) fn top_level(path: &Path) -> Option<&str> {
    path.components().find_map(|component| match component {
        Component::Normal(s) => Some(s.to_str()),
        _ => None,
    })?
}
