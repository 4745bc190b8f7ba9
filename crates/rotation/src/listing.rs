use keeper_policy::ArtifactKind;
use keeper_storage::error::Result as StorageResult;
use keeper_storage::{FileInfo, StorageBackend, TopLevelEntry};
use std::collections::BTreeMap;
use std::path::Path;

/// One top-level backup artifact and the files it consists of.
///
/// A plain artifact is exactly one file named like the artifact; a snapshot
/// directory is every file below `name/`, possibly none at all.
#[derive(Debug, Clone)]
pub(crate) struct ArtifactEntry {
    pub name: String,
    pub directory: bool,
    pub files: Vec<FileInfo>,
}
impl ArtifactEntry {
    pub fn is_directory(&self) -> bool {
        self.directory
    }

    /// Whether `file_name` sits directly inside this snapshot directory.
    pub fn contains(&self, file_name: &str) -> bool {
        let expected = Path::new(&self.name).join(file_name);
        self.files.iter().any(|file| file.path == expected)
    }
}

fn wanted(name: &str, kind: Option<ArtifactKind>) -> bool {
    let name_kind = ArtifactKind::classify(name);
    name_kind.is_backup() && kind.is_none_or(|k| k == name_kind)
}

/// Group top-level entries and a full listing by artifact name, keeping
/// backup artifacts of `kind` (or of any backup kind when `None`). Sorted
/// ascending by name.
pub(crate) fn group(
    top_level: Vec<TopLevelEntry>,
    files: Vec<FileInfo>,
    kind: Option<ArtifactKind>,
) -> Vec<ArtifactEntry> {
    let mut grouped: BTreeMap<String, ArtifactEntry> = top_level
        .into_iter()
        .filter(|entry| wanted(&entry.name, kind))
        .map(|entry| {
            let artifact = ArtifactEntry {
                name: entry.name.clone(),
                directory: entry.is_dir,
                files: Vec::new(),
            };
            (entry.name, artifact)
        })
        .collect();
    for file in files {
        let Some(name) = file.artifact_name().map(str::to_string) else {
            continue;
        };
        if !wanted(&name, kind) {
            continue;
        }
        let nested = file.is_nested();
        let entry = grouped.entry(name.clone()).or_insert_with(|| ArtifactEntry {
            name,
            directory: nested,
            files: Vec::new(),
        });
        entry.directory |= nested;
        entry.files.push(file);
    }
    grouped.into_values().collect()
}

/// List `backend` and [`group`] the result.
pub(crate) async fn discover(
    backend: &(dyn StorageBackend + Send + Sync),
    kind: Option<ArtifactKind>,
) -> StorageResult<Vec<ArtifactEntry>> {
    let top_level = backend.list_top_level().await?;
    Ok(group(top_level, backend.list(None).await?, kind))
}
