//! # Ledger
//!
//! Durable, append-only log of every applied operation together with its
//! result. Entries are never edited or removed.
//!
//! ## Backends
//!
//! | Backend  | On disk                                   | Append                      |
//! |----------|-------------------------------------------|-----------------------------|
//! | `Jsonl`  | one JSON entry per line                   | one `write_all` + `sync_all` |
//! | `Yaml`   | `{schema_version, entries: [...]}`        | atomic rewrite              |
//! | `Memory` | nothing                                   | push                        |
//!
//! A JSONL file whose final line was torn by a crash (no trailing newline
//! and unparsable) is repaired on open: the fragment is dropped with a
//! warning. Any other malformed line is a persistence error.

mod replay;

use crate::config::LedgerFormat;
use crate::formats;
use crate::operation::{Operation, OperationResult};
use crate::primitives::LEDGER_SCHEMA_VERSION;
use crate::runtime::WriteToken;
use crate::KernelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One immutable ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    /// 1-based position in the ledger.
    pub sequence: u64,
    pub operation: Operation,
    pub result: OperationResult,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct YamlLedger {
    schema_version: u32,
    #[serde(default)]
    entries: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Backend {
    Memory,
    Jsonl(PathBuf),
    Yaml(PathBuf),
}

/// The append-only log.
#[derive(Debug, Clone)]
pub struct Ledger {
    backend: Backend,
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    /// A ledger that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory,
            entries: Vec::new(),
        }
    }

    /// Open (or start) a ledger file in the given format.
    pub fn open(path: impl AsRef<Path>, format: LedgerFormat) -> Result<Self, KernelError> {
        let path = path.as_ref().to_path_buf();
        let (backend, entries) = match format {
            LedgerFormat::Jsonl => {
                let entries = load_jsonl(&path)?;
                (Backend::Jsonl(path), entries)
            }
            LedgerFormat::Yaml => {
                let entries = load_yaml(&path)?;
                (Backend::Yaml(path), entries)
            }
        };
        check_sequence(&entries)?;
        tracing::debug!(entries = entries.len(), "ledger opened");
        Ok(Self { backend, entries })
    }

    /// Backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::Memory => None,
            Backend::Jsonl(path) | Backend::Yaml(path) => Some(path),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Durably append one entry and return its sequence number. On error
    /// nothing was recorded.
    pub fn append(
        &mut self,
        _token: &WriteToken,
        operation: Operation,
        result: OperationResult,
        recorded_at: DateTime<Utc>,
    ) -> Result<u64, KernelError> {
        let entry = LedgerEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            sequence: self.entries.len() as u64 + 1,
            operation,
            result,
            recorded_at,
        };

        match &self.backend {
            Backend::Memory => {}
            Backend::Jsonl(path) => append_jsonl(path, &entry)?,
            Backend::Yaml(path) => {
                let doc = YamlLedger {
                    schema_version: LEDGER_SCHEMA_VERSION,
                    entries: self
                        .entries
                        .iter()
                        .cloned()
                        .chain(std::iter::once(entry.clone()))
                        .collect(),
                };
                formats::write_atomic(path, formats::to_yaml(&doc)?.as_bytes())?;
            }
        }

        let sequence = entry.sequence;
        self.entries.push(entry);
        Ok(sequence)
    }

    // =========================================================================
    // READS
    // =========================================================================

    #[must_use]
    pub fn read_all(&self) -> &[LedgerEntry] {
        &self.entries
    }

    #[must_use]
    pub fn read_by_kernel(&self, kernel_id: &str) -> Vec<&LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| e.operation.kernel_id() == kernel_id)
            .collect()
    }

    #[must_use]
    pub fn read_by_issue(&self, issue: &str) -> Vec<&LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| e.operation.issue == issue)
            .collect()
    }

    /// Entries whose operation timestamp lies in `[start, end]`.
    #[must_use]
    pub fn read_by_time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| e.operation.timestamp >= start && e.operation.timestamp <= end)
            .collect()
    }

    /// Whether an operation with this id has already been applied.
    #[must_use]
    pub fn contains_successful_op(&self, op_id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.result.success && e.operation.op_id == op_id)
    }
}

fn check_sequence(entries: &[LedgerEntry]) -> Result<(), KernelError> {
    for (i, entry) in entries.iter().enumerate() {
        let expected = i as u64 + 1;
        if entry.sequence != expected {
            return Err(KernelError::Persistence(format!(
                "ledger entry {} has sequence {}, expected {}",
                entry.entry_id, entry.sequence, expected
            )));
        }
    }
    Ok(())
}

fn append_jsonl(path: &Path, entry: &LedgerEntry) -> Result<(), KernelError> {
    append_jsonl_with(path, entry, |file, bytes| {
        file.write_all(bytes)?;
        file.sync_all()
    })
}

/// Append one line through `write`. If `write` fails the file is cut back
/// to its previous length, so a partial line is never left for the next
/// append to land on.
fn append_jsonl_with<F>(path: &Path, entry: &LedgerEntry, write: F) -> Result<(), KernelError>
where
    F: FnOnce(&mut File, &[u8]) -> std::io::Result<()>,
{
    formats::ensure_parent(path)?;
    let mut line =
        serde_json::to_string(entry).map_err(|e| KernelError::Persistence(e.to_string()))?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| formats::io_error(path, e))?;
    let original_len = file
        .metadata()
        .map_err(|e| formats::io_error(path, e))?
        .len();

    if let Err(err) = write(&mut file, line.as_bytes()) {
        if let Err(cut) = file.set_len(original_len).and_then(|()| file.sync_all()) {
            tracing::error!(
                path = %path.display(),
                error = %cut,
                "could not remove partial ledger line"
            );
        }
        return Err(formats::io_error(path, err));
    }
    Ok(())
}

fn load_jsonl(path: &Path) -> Result<Vec<LedgerEntry>, KernelError> {
    let Some(text) = formats::read_document(path)? else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    let mut offset = 0usize;
    for (index, line) in text.split_inclusive('\n').enumerate() {
        let complete = line.ends_with('\n');
        let body = line.trim_end();
        if body.is_empty() {
            offset += line.len();
            continue;
        }
        match (serde_json::from_str::<LedgerEntry>(body), complete) {
            (Ok(entry), true) => entries.push(entry),
            (Ok(entry), false) => {
                // Whole entry, newline lost: restore it so the next append
                // starts on a fresh line.
                append_newline(path)?;
                entries.push(entry);
            }
            (Err(_), false) => {
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    "dropping torn final ledger line"
                );
                truncate(path, offset)?;
            }
            (Err(e), true) => {
                return Err(KernelError::Persistence(format!(
                    "{}: line {}: {}",
                    path.display(),
                    index + 1,
                    e
                )));
            }
        }
        offset += line.len();
    }
    Ok(entries)
}

fn append_newline(path: &Path) -> Result<(), KernelError> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| formats::io_error(path, e))?;
    file.write_all(b"\n")
        .map_err(|e| formats::io_error(path, e))?;
    file.sync_all().map_err(|e| formats::io_error(path, e))
}

fn truncate(path: &Path, len: usize) -> Result<(), KernelError> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| formats::io_error(path, e))?;
    file.set_len(len as u64)
        .map_err(|e| formats::io_error(path, e))?;
    file.sync_all().map_err(|e| formats::io_error(path, e))
}

fn load_yaml(path: &Path) -> Result<Vec<LedgerEntry>, KernelError> {
    let Some(text) = formats::read_document(path)? else {
        return Ok(Vec::new());
    };
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let doc: YamlLedger = formats::from_yaml(&text)?;
    if doc.schema_version != LEDGER_SCHEMA_VERSION {
        return Err(KernelError::Persistence(format!(
            "{}: unsupported ledger schema version {}",
            path.display(),
            doc.schema_version
        )));
    }
    Ok(doc.entries)
}

// =============================================================================
// TESTS
// =============================================================================
