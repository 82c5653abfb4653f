//! The write pipeline over the persistence core.
//!
//! Every mutation runs validate -> journal (pending) -> signed write ->
//! journal (completed | failed), serialized per initiative. `recover` walks
//! the journals after a restart and settles pending entries whose write
//! verifiably landed.

use crate::core::config::VaultConfig;
use crate::core::dependency::{DependencyManager, DependencyReport};
use crate::core::error::VaultError;
use crate::core::filesystem::{
    FilesystemManager, IntegrityReport, ReadOutcome, serialize_document,
};
use crate::core::integrity::{IntegrityManager, digest_hex};
use crate::core::journal::{JournalManager, MalformedLine};
use crate::core::locks::InitiativeLocks;
use crate::core::model::{
    DependencyContract, Initiative, JournalEntry, JournalIntent, JournalStatus, Task,
};
use crate::core::store;
use rayon::prelude::*;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const OP_INITIATIVE_WRITE: &str = "initiative.write";
pub const OP_TASK_WRITE: &str = "task.write";
pub const OP_DEPENDENCIES_WRITE: &str = "dependencies.write";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecoveryReport {
    /// Pending entries whose write was found intact; now `completed`.
    pub resolved: Vec<JournalEntry>,
    /// Pending entries the caller must redrive or abandon.
    pub unresolved: Vec<JournalEntry>,
    pub malformed: Vec<(String, MalformedLine)>,
}

#[derive(Debug)]
pub struct TaskVault {
    fs: FilesystemManager,
    journal: JournalManager,
    pipelines: InitiativeLocks,
    /// Held across a task save so the id-to-initiative check and the write
    /// are one step for the whole vault.
    placement: Mutex<()>,
}

impl TaskVault {
    pub fn new(root: impl Into<PathBuf>, secret: impl Into<Vec<u8>>) -> Result<Self, VaultError> {
        let root = root.into();
        let integrity = IntegrityManager::new(secret)?;
        let locks = Arc::new(InitiativeLocks::new());
        Ok(Self {
            fs: FilesystemManager::with_locks(root.clone(), integrity, Arc::clone(&locks)),
            journal: JournalManager::with_locks(root, locks),
            pipelines: InitiativeLocks::new(),
            placement: Mutex::new(()),
        })
    }

    pub fn open(config: &VaultConfig) -> Result<Self, VaultError> {
        config.validate()?;
        let secret = config.resolve_secret()?;
        tracing::debug!(root = %config.root_dir.display(), "opening vault");
        Self::new(config.root_dir.clone(), secret)
    }

    pub fn root(&self) -> &Path {
        &self.fs.store().root
    }

    pub fn filesystem(&self) -> &FilesystemManager {
        &self.fs
    }

    pub fn journal(&self) -> &JournalManager {
        &self.journal
    }

    // ===== Writes =====

    pub fn create_initiative(
        &self,
        initiative: &Initiative,
        request_id: Option<&str>,
    ) -> Result<JournalEntry, VaultError> {
        store::validate_id(&initiative.id)?;
        self.pipelines.with_lock(&initiative.id, || -> Result<JournalEntry, VaultError> {
            self.fs.ensure_initiative_directory(&initiative.id)?;
            let path = self.fs.store().manifest_path(&initiative.id)?;
            let payload = self.write_payload(&path, initiative, "initiativeId", &initiative.id)?;
            self.journaled(&initiative.id, OP_INITIATIVE_WRITE, payload, request_id, || {
                self.fs.write_initiative(initiative)
            })
        })
    }

    pub fn save_task(&self, task: &Task, request_id: Option<&str>) -> Result<JournalEntry, VaultError> {
        store::validate_id(&task.initiative_id)?;
        store::validate_id(&task.id)?;
        let _placement = self.placement.lock().unwrap_or_else(|e| e.into_inner());
        self.pipelines.with_lock(&task.initiative_id, || -> Result<JournalEntry, VaultError> {
            self.require_initiative(&task.initiative_id)?;
            if let Some(owner) = self.locate_task(&task.id)? {
                if owner != task.initiative_id {
                    return Err(VaultError::ValidationError(format!(
                        "task {} belongs to initiative {}; its initiative cannot change",
                        task.id, owner
                    )));
                }
            }
            let path = self.fs.store().task_path(&task.initiative_id, &task.id)?;
            let payload = self.write_payload(&path, task, "taskId", &task.id)?;
            self.journaled(&task.initiative_id, OP_TASK_WRITE, payload, request_id, || {
                self.fs.write_task(task)
            })
        })
    }

    /// Rejects the whole set if it contains a cycle; otherwise persists it
    /// and returns the report, chronological violations included.
    pub fn save_dependencies(
        &self,
        initiative_id: &str,
        contracts: Vec<DependencyContract>,
        request_id: Option<&str>,
    ) -> Result<DependencyReport, VaultError> {
        store::validate_id(initiative_id)?;
        self.pipelines.with_lock(initiative_id, || -> Result<DependencyReport, VaultError> {
            self.require_initiative(initiative_id)?;
            let tasks = self.fs.load_tasks(initiative_id)?;
            let mut manager = DependencyManager::new();
            manager.load_contracts(contracts);
            let report = manager.validate(&tasks);
            if !report.is_acyclic() {
                tracing::warn!(
                    initiative = initiative_id,
                    cycles = report.cycles.len(),
                    "rejecting cyclic dependency set"
                );
                return Err(VaultError::DependencyCycle(report.cycles));
            }

            let path = self.fs.store().dependencies_path(initiative_id)?;
            let payload = self.write_payload(&path, manager.contracts(), "initiativeId", initiative_id)?;
            self.journaled(initiative_id, OP_DEPENDENCIES_WRITE, payload, request_id, || {
                self.fs.write_dependencies(initiative_id, manager.contracts())
            })?;
            Ok(report)
        })
    }

    fn write_payload<T: serde::Serialize + ?Sized>(
        &self,
        path: &Path,
        value: &T,
        id_key: &str,
        id: &str,
    ) -> Result<JsonValue, VaultError> {
        let content = serialize_document(value)?;
        let mut payload = serde_json::Map::new();
        payload.insert(id_key.to_string(), JsonValue::from(id));
        payload.insert("path".into(), JsonValue::from(self.fs.store().relative(path)));
        payload.insert("digest".into(), JsonValue::from(digest_hex(&content)));
        Ok(JsonValue::Object(payload))
    }

    fn journaled<F>(
        &self,
        initiative_id: &str,
        operation: &str,
        payload: JsonValue,
        request_id: Option<&str>,
        write: F,
    ) -> Result<JournalEntry, VaultError>
    where
        F: FnOnce() -> Result<(), VaultError>,
    {
        let mut entry = self.journal.append(
            initiative_id,
            JournalIntent::new(operation, payload).with_request_id(request_id),
        )?;
        match write() {
            Ok(()) => {
                self.journal.mark_complete(initiative_id, &entry.id)?;
                entry.status = JournalStatus::Completed;
                Ok(entry)
            }
            Err(e) => {
                if let Err(mark_err) = self.journal.mark_failed(initiative_id, &entry.id) {
                    tracing::warn!(
                        entry = %entry.id,
                        error = %mark_err,
                        "could not mark journal entry failed; it stays pending"
                    );
                }
                Err(e)
            }
        }
    }

    fn require_initiative(&self, initiative_id: &str) -> Result<Initiative, VaultError> {
        match self.fs.read_initiative(initiative_id) {
            ReadOutcome::Found(initiative) => Ok(initiative),
            ReadOutcome::NotFound => Err(VaultError::NotFound(format!("initiative {}", initiative_id))),
            ReadOutcome::IntegrityViolation(failure) => Err(VaultError::IntegrityViolation(format!(
                "initiative {} manifest: {}",
                initiative_id, failure
            ))),
        }
    }

    /// Initiative currently holding a file for `task_id`, if any.
    fn locate_task(&self, task_id: &str) -> Result<Option<String>, VaultError> {
        for initiative_id in self.fs.list_initiatives()? {
            if self.fs.store().task_path(&initiative_id, task_id)?.exists() {
                return Ok(Some(initiative_id));
            }
        }
        Ok(None)
    }

    // ===== Reads =====

    pub fn load_initiative(&self, initiative_id: &str) -> ReadOutcome<Initiative> {
        self.fs.read_initiative(initiative_id)
    }

    pub fn load_task(&self, initiative_id: &str, task_id: &str) -> ReadOutcome<Task> {
        self.fs.read_task(initiative_id, task_id)
    }

    pub fn load_tasks(&self, initiative_id: &str) -> Result<Vec<Task>, VaultError> {
        self.fs.load_tasks(initiative_id)
    }

    pub fn load_dependencies(&self, initiative_id: &str) -> ReadOutcome<Vec<DependencyContract>> {
        self.fs.read_dependencies(initiative_id)
    }

    pub fn list_initiatives(&self) -> Result<Vec<String>, VaultError> {
        self.fs.list_initiatives()
    }

    pub fn list_tasks(&self, initiative_id: &str) -> Result<Vec<String>, VaultError> {
        self.fs.list_tasks(initiative_id)
    }

    /// Validates the stored contracts against the stored tasks.
    pub fn check_dependencies(&self, initiative_id: &str) -> Result<DependencyReport, VaultError> {
        let contracts = match self.fs.read_dependencies(initiative_id) {
            ReadOutcome::Found(contracts) => contracts,
            ReadOutcome::NotFound => Vec::new(),
            ReadOutcome::IntegrityViolation(failure) => {
                return Err(VaultError::IntegrityViolation(format!(
                    "initiative {} dependencies: {}",
                    initiative_id, failure
                )));
            }
        };
        let tasks = self.fs.load_tasks(initiative_id)?;
        let mut manager = DependencyManager::new();
        manager.load_contracts(contracts);
        Ok(manager.validate(&tasks))
    }

    // ===== Integrity and recovery =====

    pub fn verify_initiative(&self, initiative_id: &str) -> Result<IntegrityReport, VaultError> {
        self.fs.verify_initiative(initiative_id)
    }

    pub fn verify_all(&self) -> Result<Vec<IntegrityReport>, VaultError> {
        self.fs
            .list_initiatives()?
            .par_iter()
            .map(|id| self.fs.verify_initiative(id))
            .collect()
    }

    /// Settles pending journal entries across every initiative. Entries
    /// already completed or failed are left alone, so running this twice is
    /// harmless.
    pub fn recover(&self) -> Result<RecoveryReport, VaultError> {
        let mut report = RecoveryReport::default();
        for initiative_id in self.fs.list_initiatives()? {
            self.pipelines.with_lock(&initiative_id, || -> Result<(), VaultError> {
                self.recover_initiative(&initiative_id, &mut report)
            })?;
        }
        Ok(report)
    }

    fn recover_initiative(
        &self,
        initiative_id: &str,
        report: &mut RecoveryReport,
    ) -> Result<(), VaultError> {
        let replay = self.journal.replay(initiative_id)?;
        report.malformed.extend(
            replay
                .malformed
                .iter()
                .cloned()
                .map(|line| (initiative_id.to_string(), line)),
        );
        for entry in replay.pending() {
            if self.write_landed(entry) {
                self.journal.mark_complete(initiative_id, &entry.id)?;
                tracing::info!(entry = %entry.id, op = %entry.operation, "recovered: write landed");
                let mut settled = entry.clone();
                settled.status = JournalStatus::Completed;
                report.resolved.push(settled);
            } else {
                tracing::info!(entry = %entry.id, op = %entry.operation, "unresolved pending entry");
                report.unresolved.push(entry.clone());
            }
        }
        Ok(())
    }

    fn write_landed(&self, entry: &JournalEntry) -> bool {
        let path = entry.payload.get("path").and_then(|v| v.as_str());
        let digest = entry.payload.get("digest").and_then(|v| v.as_str());
        match (path, digest) {
            (Some(path), Some(digest)) => {
                self.fs.verified_digest(path).as_deref() == Some(digest)
            }
            _ => false,
        }
    }
}
