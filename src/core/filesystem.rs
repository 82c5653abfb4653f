//! Signed document storage for initiatives, tasks and dependency contracts.
//!
//! Every content file `F` has a sidecar `F.sig` with its signature. Writes go
//! content first, then sidecar, under the initiative's write lock; a crash in
//! between leaves a stale sidecar which the next read rejects. Nothing is
//! parsed until its signature checks out.

use crate::core::error::VaultError;
use crate::core::integrity::{IntegrityManager, digest_hex};
use crate::core::locks::InitiativeLocks;
use crate::core::model::{DependencyContract, Initiative, Task};
use crate::core::store::{self, Store, signature_path};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Why a stored document was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityFailure {
    MissingSignature,
    SignatureMismatch,
    Malformed(String),
    /// The document names a different owner than the location it was read from.
    OwnershipMismatch { expected: String, found: String },
}

impl fmt::Display for IntegrityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityFailure::MissingSignature => write!(f, "missing signature sidecar"),
            IntegrityFailure::SignatureMismatch => write!(f, "signature mismatch"),
            IntegrityFailure::Malformed(reason) => write!(f, "malformed content: {}", reason),
            IntegrityFailure::OwnershipMismatch { expected, found } => {
                write!(f, "expected owner {:?}, document says {:?}", expected, found)
            }
        }
    }
}

/// Result of every read. Tampered data is never handed out as `Found`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome<T> {
    Found(T),
    NotFound,
    IntegrityViolation(IntegrityFailure),
}

impl<T> ReadOutcome<T> {
    /// Collapses "missing" and "tampered" into `None`.
    pub fn found(self) -> Option<T> {
        match self {
            ReadOutcome::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, ReadOutcome::Found(_))
    }

    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, ReadOutcome::IntegrityViolation(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ReadOutcome<U> {
        match self {
            ReadOutcome::Found(value) => ReadOutcome::Found(f(value)),
            ReadOutcome::NotFound => ReadOutcome::NotFound,
            ReadOutcome::IntegrityViolation(failure) => ReadOutcome::IntegrityViolation(failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileViolation {
    pub path: String,
    pub failure: IntegrityFailure,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntegrityReport {
    pub initiative_id: String,
    pub checked: usize,
    pub violations: Vec<FileViolation>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Serialized form of every stored document.
pub fn serialize_document<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, VaultError> {
    Ok(serde_json::to_vec_pretty(value)?)
}

#[derive(Debug, Clone)]
pub struct FilesystemManager {
    store: Store,
    integrity: IntegrityManager,
    locks: Arc<InitiativeLocks>,
}

impl FilesystemManager {
    pub fn new(root: impl Into<PathBuf>, integrity: IntegrityManager) -> Self {
        Self::with_locks(root, integrity, Arc::new(InitiativeLocks::new()))
    }

    /// Shares a lock registry with other writers of the same root
    /// (the journal in particular).
    pub fn with_locks(
        root: impl Into<PathBuf>,
        integrity: IntegrityManager,
        locks: Arc<InitiativeLocks>,
    ) -> Self {
        Self {
            store: Store::new(root),
            integrity,
            locks,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn ensure_initiative_directory(&self, initiative_id: &str) -> Result<PathBuf, VaultError> {
        let dir = self.store.initiative_dir(initiative_id)?;
        store::ensure_private_dir(&dir)?;
        store::ensure_private_dir(&dir.join(store::TASKS_DIR))?;
        Ok(dir)
    }

    // ===== Writes =====

    pub fn write_initiative(&self, initiative: &Initiative) -> Result<(), VaultError> {
        let path = self.store.manifest_path(&initiative.id)?;
        let content = serialize_document(initiative)?;
        self.write_signed(&initiative.id, &path, &content)
    }

    pub fn write_task(&self, task: &Task) -> Result<(), VaultError> {
        let path = self.store.task_path(&task.initiative_id, &task.id)?;
        let content = serialize_document(task)?;
        self.write_signed(&task.initiative_id, &path, &content)
    }

    pub fn write_dependencies(
        &self,
        initiative_id: &str,
        contracts: &[DependencyContract],
    ) -> Result<(), VaultError> {
        let path = self.store.dependencies_path(initiative_id)?;
        let content = serialize_document(&contracts)?;
        self.write_signed(initiative_id, &path, &content)
    }

    fn write_signed(
        &self,
        initiative_id: &str,
        path: &Path,
        content: &[u8],
    ) -> Result<(), VaultError> {
        self.ensure_initiative_directory(initiative_id)?;
        let signature = self.integrity.sign(content);
        self.locks.with_lock(initiative_id, || -> Result<(), VaultError> {
            fs::write(path, content).map_err(VaultError::IoError)?;
            fs::write(signature_path(path), signature.as_bytes()).map_err(VaultError::IoError)
        })?;
        tracing::debug!(
            path = %self.store.relative(path),
            bytes = content.len(),
            "wrote signed document"
        );
        Ok(())
    }

    // ===== Reads =====

    pub fn read_initiative(&self, initiative_id: &str) -> ReadOutcome<Initiative> {
        let path = match self.store.manifest_path(initiative_id) {
            Ok(path) => path,
            Err(_) => return ReadOutcome::NotFound,
        };
        match self.read_signed::<Initiative>(&path) {
            ReadOutcome::Found(initiative) if initiative.id != initiative_id => {
                self.reject(
                    &path,
                    IntegrityFailure::OwnershipMismatch {
                        expected: initiative_id.to_string(),
                        found: initiative.id,
                    },
                )
            }
            other => other,
        }
    }

    pub fn read_task(&self, initiative_id: &str, task_id: &str) -> ReadOutcome<Task> {
        let path = match self.store.task_path(initiative_id, task_id) {
            Ok(path) => path,
            Err(_) => return ReadOutcome::NotFound,
        };
        match self.read_signed::<Task>(&path) {
            ReadOutcome::Found(task) if task.initiative_id != initiative_id => self.reject(
                &path,
                IntegrityFailure::OwnershipMismatch {
                    expected: initiative_id.to_string(),
                    found: task.initiative_id,
                },
            ),
            ReadOutcome::Found(task) if task.id != task_id => self.reject(
                &path,
                IntegrityFailure::OwnershipMismatch {
                    expected: task_id.to_string(),
                    found: task.id,
                },
            ),
            other => other,
        }
    }

    pub fn read_dependencies(&self, initiative_id: &str) -> ReadOutcome<Vec<DependencyContract>> {
        match self.store.dependencies_path(initiative_id) {
            Ok(path) => self.read_signed(&path),
            Err(_) => ReadOutcome::NotFound,
        }
    }

    /// SHA-256 of the file at `relative`, only if its sidecar verifies.
    pub fn verified_digest(&self, relative: &str) -> Option<String> {
        let path = self.store.resolve(relative).ok()?;
        match self.read_verified_bytes(&path) {
            ReadOutcome::Found(bytes) => Some(digest_hex(&bytes)),
            _ => None,
        }
    }

    fn read_signed<T: DeserializeOwned>(&self, path: &Path) -> ReadOutcome<T> {
        let bytes = match self.read_verified_bytes(path) {
            ReadOutcome::Found(bytes) => bytes,
            ReadOutcome::NotFound => return ReadOutcome::NotFound,
            ReadOutcome::IntegrityViolation(failure) => {
                return ReadOutcome::IntegrityViolation(failure);
            }
        };
        match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => {
                tracing::debug!(path = %self.store.relative(path), "read verified document");
                ReadOutcome::Found(value)
            }
            Err(e) => self.reject(path, IntegrityFailure::Malformed(e.to_string())),
        }
    }

    fn read_verified_bytes(&self, path: &Path) -> ReadOutcome<Vec<u8>> {
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return ReadOutcome::NotFound,
            Err(e) => {
                tracing::warn!(path = %self.store.relative(path), error = %e, "document unreadable");
                return ReadOutcome::NotFound;
            }
        };
        let signature = match fs::read_to_string(signature_path(path)) {
            Ok(signature) => signature,
            Err(_) => return self.reject(path, IntegrityFailure::MissingSignature),
        };
        if !self.integrity.verify(&content, &signature) {
            return self.reject(path, IntegrityFailure::SignatureMismatch);
        }
        ReadOutcome::Found(content)
    }

    fn reject<T>(&self, path: &Path, failure: IntegrityFailure) -> ReadOutcome<T> {
        tracing::warn!(
            path = %self.store.relative(path),
            reason = %failure,
            "refusing untrusted document"
        );
        ReadOutcome::IntegrityViolation(failure)
    }

    // ===== Listing =====

    /// Task ids stored under `initiative_id`, sorted.
    pub fn list_tasks(&self, initiative_id: &str) -> Result<Vec<String>, VaultError> {
        let dir = self.store.tasks_dir(initiative_id)?;
        let mut ids: Vec<String> = visible_entries(&dir)?
            .into_iter()
            .filter_map(|name| name.strip_suffix(".json").map(String::from))
            .filter(|id| store::validate_id(id).is_ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Initiative ids under the root, sorted. Hidden entries are skipped.
    pub fn list_initiatives(&self) -> Result<Vec<String>, VaultError> {
        let mut ids = Vec::new();
        for name in visible_entries(&self.store.root)? {
            if self.store.root.join(&name).is_dir() && store::validate_id(&name).is_ok() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Every verified task of an initiative; unreadable ones are skipped.
    pub fn load_tasks(&self, initiative_id: &str) -> Result<Vec<Task>, VaultError> {
        Ok(self
            .list_tasks(initiative_id)?
            .iter()
            .filter_map(|id| self.read_task(initiative_id, id).found())
            .collect())
    }

    /// Checks every signed document of one initiative.
    pub fn verify_initiative(&self, initiative_id: &str) -> Result<IntegrityReport, VaultError> {
        let mut report = IntegrityReport {
            initiative_id: initiative_id.to_string(),
            ..IntegrityReport::default()
        };
        let mut record = |path: PathBuf, outcome: Option<IntegrityFailure>| {
            report.checked += 1;
            if let Some(failure) = outcome {
                report.violations.push(FileViolation {
                    path: self.store.relative(&path),
                    failure,
                });
            }
        };

        let manifest = self.store.manifest_path(initiative_id)?;
        match self.read_initiative(initiative_id) {
            ReadOutcome::Found(_) => record(manifest, None),
            ReadOutcome::IntegrityViolation(f) => record(manifest, Some(f)),
            // An initiative directory without a manifest is itself suspicious.
            ReadOutcome::NotFound => record(manifest, Some(IntegrityFailure::Malformed(
                "manifest missing".into(),
            ))),
        }

        let deps = self.store.dependencies_path(initiative_id)?;
        match self.read_dependencies(initiative_id) {
            ReadOutcome::Found(_) => record(deps, None),
            ReadOutcome::IntegrityViolation(f) => record(deps, Some(f)),
            ReadOutcome::NotFound => {}
        }

        for task_id in self.list_tasks(initiative_id)? {
            let path = self.store.task_path(initiative_id, &task_id)?;
            match self.read_task(initiative_id, &task_id) {
                ReadOutcome::IntegrityViolation(f) => record(path, Some(f)),
                _ => record(path, None),
            }
        }
        Ok(report)
    }
}

/// Directory entry names not starting with `.`, excluding sidecars.
/// A missing directory lists as empty.
fn visible_entries(dir: &Path) -> Result<Vec<String>, VaultError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(VaultError::IoError(e)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(VaultError::IoError)?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name.ends_with(&format!(".{}", store::SIGNATURE_EXT)) {
            continue;
        }
        names.push(name);
    }
    Ok(names)
}
