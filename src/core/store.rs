//! On-disk layout of the vault.
//!
//! Every initiative owns one directory under the storage root:
//!
//! ```text
//! <root>/<initiativeId>/
//!   manifest.json, manifest.json.sig
//!   tasks/<taskId>.json, tasks/<taskId>.json.sig
//!   dependencies.json, dependencies.json.sig
//!   journal.jsonl
//! ```
//!
//! Ids are used as path segments, so every accessor validates them first.

use crate::core::error::VaultError;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DEPENDENCIES_FILE: &str = "dependencies.json";
pub const JOURNAL_FILE: &str = "journal.jsonl";
pub const TASKS_DIR: &str = "tasks";
pub const SIGNATURE_EXT: &str = "sig";

const MAX_ID_LEN: usize = 128;

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("id pattern is a valid regex")
});

/// Rejects ids that could escape the initiative subtree or collide with
/// hidden/sidecar files.
pub fn validate_id(id: &str) -> Result<(), VaultError> {
    if id.len() > MAX_ID_LEN || id.contains("..") || !ID_PATTERN.is_match(id) {
        return Err(VaultError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Store handle: the root directory every initiative subtree hangs off.
#[derive(Debug, Clone)]
pub struct Store {
    pub root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn initiative_dir(&self, initiative_id: &str) -> Result<PathBuf, VaultError> {
        validate_id(initiative_id)?;
        Ok(self.root.join(initiative_id))
    }

    pub fn tasks_dir(&self, initiative_id: &str) -> Result<PathBuf, VaultError> {
        Ok(self.initiative_dir(initiative_id)?.join(TASKS_DIR))
    }

    pub fn manifest_path(&self, initiative_id: &str) -> Result<PathBuf, VaultError> {
        Ok(self.initiative_dir(initiative_id)?.join(MANIFEST_FILE))
    }

    pub fn task_path(&self, initiative_id: &str, task_id: &str) -> Result<PathBuf, VaultError> {
        validate_id(task_id)?;
        Ok(self.tasks_dir(initiative_id)?.join(format!("{}.json", task_id)))
    }

    pub fn dependencies_path(&self, initiative_id: &str) -> Result<PathBuf, VaultError> {
        Ok(self.initiative_dir(initiative_id)?.join(DEPENDENCIES_FILE))
    }

    pub fn journal_path(&self, initiative_id: &str) -> Result<PathBuf, VaultError> {
        Ok(self.initiative_dir(initiative_id)?.join(JOURNAL_FILE))
    }

    /// Path relative to the root, as recorded in journal payloads.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Resolves a journal-recorded relative path, refusing anything that
    /// would climb out of the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, VaultError> {
        let rel = Path::new(relative);
        let escapes = rel.is_absolute()
            || rel
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)));
        if escapes {
            return Err(VaultError::ValidationError(format!(
                "Path escapes the vault root: {}",
                relative
            )));
        }
        Ok(self.root.join(rel))
    }
}

/// `F` -> `F.sig`.
pub fn signature_path(content_path: &Path) -> PathBuf {
    let mut os = content_path.as_os_str().to_os_string();
    os.push(".");
    os.push(SIGNATURE_EXT);
    PathBuf::from(os)
}

/// Creates `dir` (and missing parents) restricted to the owning account.
/// New directories are created with that mode, never widened first; an
/// existing `dir` is tightened. Idempotent.
pub fn ensure_private_dir(dir: &Path) -> Result<(), VaultError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .map_err(VaultError::IoError)?;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(VaultError::IoError)?;
    }
    #[cfg(not(unix))]
    fs::create_dir_all(dir).map_err(VaultError::IoError)?;
    Ok(())
}
