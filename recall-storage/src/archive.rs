//! Archive snapshot recovery.
//!
//! Exported cache tables live under `<root>/<owner>/...`, each snapshot
//! directory marked by a `<key>.alias`, `<key>.view` or `<key>.queryId` file.
//! An external import utility loads a snapshot directory back into the
//! relational store.

use std::path::{Path, PathBuf};
use std::process::Command;

use recall_core::{RecallResult, StoreError};

/// Locates and imports archived snapshots.
///
/// # Implementation Requirements
///
/// - `find_snapshots` returns snapshot directories, never marker files
/// - `find_snapshots` must return an empty list (not an error) when the owner
///   has no archive
/// - `import` must fail when the import utility reports failure
pub trait ArchiveStore: Send + Sync {
    /// Snapshot directories for `owner` that carry a marker for `key`.
    fn find_snapshots(&self, owner: &str, key: &str) -> RecallResult<Vec<PathBuf>>;

    /// Import one snapshot directory into the relational store.
    fn import(&self, snapshot_dir: &Path) -> RecallResult<()>;
}

/// Filesystem archive driven by an import command.
pub struct FsArchiveStore {
    root: PathBuf,
    import_command: String,
}

impl FsArchiveStore {
    /// `import_command` is split on whitespace; the snapshot directory is
    /// appended as the final argument.
    pub fn new(root: impl Into<PathBuf>, import_command: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            import_command: import_command.into(),
        }
    }

    fn collect(dir: &Path, key: &str, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
        let markers = [
            format!("{}.alias", key),
            format!("{}.view", key),
            format!("{}.queryId", key),
        ];
        let mut entries = std::fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                Self::collect(&path, key, found)?;
            } else if markers
                .iter()
                .any(|m| entry.file_name().to_str() == Some(m.as_str()))
            {
                tracing::debug!(path = %path.display(), "found archive marker");
                if let Some(parent) = path.parent() {
                    if !found.iter().any(|p| p == parent) {
                        found.push(parent.to_path_buf());
                    }
                }
            }
        }
        Ok(())
    }
}

impl ArchiveStore for FsArchiveStore {
    fn find_snapshots(&self, owner: &str, key: &str) -> RecallResult<Vec<PathBuf>> {
        if owner.is_empty() || owner.contains(['/', '\\']) || owner == ".." || owner == "." {
            return Ok(Vec::new());
        }
        let owner_dir = self.root.join(owner);
        if !owner_dir.is_dir() {
            tracing::debug!(dir = %owner_dir.display(), "no archive for owner");
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        Self::collect(&owner_dir, key, &mut found).map_err(|e| StoreError::ArchiveImportFailed {
            path: owner_dir.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(found)
    }

    fn import(&self, snapshot_dir: &Path) -> RecallResult<()> {
        let failed = |reason: String| StoreError::ArchiveImportFailed {
            path: snapshot_dir.display().to_string(),
            reason,
        };

        let mut parts = self.import_command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| failed("import command is empty".to_string()))?;

        tracing::info!(dir = %snapshot_dir.display(), "importing cached results");
        let output = Command::new(program)
            .args(parts)
            .arg(snapshot_dir)
            .output()
            .map_err(|e| failed(e.to_string()))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            tracing::info!(target: "recall::archive", "{}", line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            tracing::error!(target: "recall::archive", "{}", line);
        }

        if !output.status.success() {
            return Err(failed(format!("exit status {}", output.status)).into());
        }
        Ok(())
    }
}
