//! Initiative-scoped operation journal (`<root>/<initiative>/journal.jsonl`).
//!
//! One compact JSON object per line. Appends never touch earlier lines.
//! Status updates rewrite the file through a temp file and an atomic rename,
//! so a crash mid-update leaves either the old or the new journal, never a
//! truncated one. Lines that fail to parse are reported by `replay` and kept
//! verbatim by rewrites.

use crate::core::error::VaultError;
use crate::core::locks::InitiativeLocks;
use crate::core::model::{JournalEntry, JournalIntent, JournalStatus};
use crate::core::store::{self, Store};
use crate::core::time;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    /// 1-based.
    pub line_number: usize,
    pub content: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReplayReport {
    pub entries: Vec<JournalEntry>,
    pub malformed: Vec<MalformedLine>,
}

impl ReplayReport {
    pub fn pending(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == JournalStatus::Pending)
    }
}

#[derive(Debug, Clone)]
pub struct JournalManager {
    store: Store,
    locks: Arc<InitiativeLocks>,
}


impl JournalManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_locks(root, Arc::new(InitiativeLocks::new()))
    }

    pub fn with_locks(root: impl Into<PathBuf>, locks: Arc<InitiativeLocks>) -> Self {
        Self {
            store: Store::new(root),
            locks,
        }
    }

    pub fn journal_path(&self, initiative_id: &str) -> Result<PathBuf, VaultError> {
        self.store.journal_path(initiative_id)
    }

    /// Assigns id and timestamp, then appends exactly one line.
    pub fn append(
        &self,
        initiative_id: &str,
        intent: JournalIntent,
    ) -> Result<JournalEntry, VaultError> {
        let path = self.journal_path(initiative_id)?;
        let entry = JournalEntry {
            id: time::new_event_id(),
            timestamp: time::now(),
            initiative_id: initiative_id.to_string(),
            operation: intent.operation,
            payload: intent.payload,
            status: JournalStatus::Pending,
            request_id: intent.request_id,
        };
        let line = serde_json::to_string(&entry)?;

        self.locks.with_lock(initiative_id, || -> Result<(), VaultError> {
            if let Some(dir) = path.parent() {
                store::ensure_private_dir(dir)?;
            }
            let mut f = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&path)
                .map_err(VaultError::IoError)?;
            // A torn tail from an earlier crash must not swallow this entry.
            if ends_mid_line(&mut f)? {
                writeln!(f).map_err(VaultError::IoError)?;
            }
            writeln!(f, "{}", line).map_err(VaultError::IoError)?;
            f.sync_data().map_err(VaultError::IoError)
        })?;

        tracing::debug!(
            initiative = initiative_id,
            entry = %entry.id,
            operation = %entry.operation,
            "journal append"
        );
        Ok(entry)
    }

    /// All entries in file order, oldest first. A missing journal is empty.
    pub fn replay(&self, initiative_id: &str) -> Result<ReplayReport, VaultError> {
        let path = self.journal_path(initiative_id)?;
        let mut report = ReplayReport::default();
        for (idx, raw) in read_lines(&path)?.into_iter().enumerate() {
            if raw.trim_ascii().is_empty() {
                continue;
            }
            let parsed = match String::from_utf8(raw) {
                Ok(line) => serde_json::from_str::<JournalEntry>(&line)
                    .map_err(|e| (line, e.to_string())),
                Err(e) => Err((
                    String::from_utf8_lossy(e.as_bytes()).into_owned(),
                    e.utf8_error().to_string(),
                )),
            };
            match parsed {
                Ok(entry) => report.entries.push(entry),
                Err((content, error)) => {
                    tracing::warn!(
                        initiative = initiative_id,
                        line = idx + 1,
                        error = %error,
                        "malformed journal line"
                    );
                    report.malformed.push(MalformedLine {
                        line_number: idx + 1,
                        content,
                        error,
                    });
                }
            }
        }
        Ok(report)
    }

    pub fn pending(&self, initiative_id: &str) -> Result<Vec<JournalEntry>, VaultError> {
        Ok(self.replay(initiative_id)?.pending().cloned().collect())
    }

    /// `Ok(true)` when the entry moved to `completed`, `Ok(false)` when it
    /// already was.
    pub fn mark_complete(&self, initiative_id: &str, entry_id: &str) -> Result<bool, VaultError> {
        self.set_status(initiative_id, entry_id, JournalStatus::Completed)
    }

    pub fn mark_failed(&self, initiative_id: &str, entry_id: &str) -> Result<bool, VaultError> {
        self.set_status(initiative_id, entry_id, JournalStatus::Failed)
    }

    fn set_status(
        &self,
        initiative_id: &str,
        entry_id: &str,
        status: JournalStatus,
    ) -> Result<bool, VaultError> {
        let path = self.journal_path(initiative_id)?;
        let changed = self.locks.with_lock(initiative_id, || -> Result<bool, VaultError> {
            let mut lines = read_lines(&path)?;
            let Some((idx, mut value)) = lines
                .iter()
                .enumerate()
                .find_map(|(idx, raw)| entry_with_id(raw, entry_id).map(|value| (idx, value)))
            else {
                return Err(VaultError::NotFound(format!(
                    "journal entry {} in initiative {}",
                    entry_id, initiative_id
                )));
            };

            let current: JournalStatus = serde_json::from_value(value["status"].clone())?;
            if current == status {
                return Ok(false);
            }
            if current.is_terminal() {
                return Err(VaultError::ValidationError(format!(
                    "journal entry {} is already {}, cannot mark {}",
                    entry_id,
                    current.as_str(),
                    status.as_str()
                )));
            }
            // Only the matching line is re-encoded; unknown fields ride along.
            value["status"] = serde_json::to_value(status)?;
            lines[idx] = serde_json::to_vec(&value)?;

            let mut out = Vec::new();
            for line in &lines {
                out.extend_from_slice(line);
                out.push(b'\n');
            }
            replace_atomically(&path, &out)?;
            Ok(true)
        })?;

        if changed {
            tracing::debug!(
                initiative = initiative_id,
                entry = entry_id,
                status = status.as_str(),
                "journal status updated"
            );
        }
        Ok(changed)
    }
}

fn ends_mid_line(f: &mut File) -> Result<bool, VaultError> {
    let len = f.metadata().map_err(VaultError::IoError)?.len();
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    f.seek(SeekFrom::Start(len - 1)).map_err(VaultError::IoError)?;
    f.read_exact(&mut last).map_err(VaultError::IoError)?;
    Ok(last[0] != b'\n')
}

/// Raw lines, split on `\n`. Bytes are kept as-is so a torn or non-UTF-8
/// line survives a rewrite untouched.
fn read_lines(path: &Path) -> Result<Vec<Vec<u8>>, VaultError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(VaultError::IoError(e)),
    };
    let mut lines: Vec<Vec<u8>> = bytes.split(|b| *b == b'\n').map(<[u8]>::to_vec).collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    Ok(lines)
}

/// Parses `raw` only far enough to match its `id`; the full object is
/// returned so fields this version does not know are preserved.
fn entry_with_id(raw: &[u8], entry_id: &str) -> Option<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_slice(raw).ok()?;
    let matches = value.get("id").and_then(|id| id.as_str()) == Some(entry_id)
        && value.get("status").is_some();
    matches.then_some(value)
}

/// Write to `.<name>.tmp` beside `path`, fsync, then rename over `path`.
fn replace_atomically(path: &Path, bytes: &[u8]) -> Result<(), VaultError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| VaultError::ValidationError(format!("not a file: {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    {
        let mut f = File::create(&tmp).map_err(VaultError::IoError)?;
        f.write_all(bytes).map_err(VaultError::IoError)?;
        f.sync_all().map_err(VaultError::IoError)?;
    }
    fs::rename(&tmp, path).map_err(VaultError::IoError)
}
