//! # File Formats
//!
//! Shared helpers for the YAML documents (registry, YAML ledger) and the
//! atomic replace used when rewriting them.
//!
//! A rewrite goes to a sibling temp file, is synced, then renamed over the
//! target. Readers see either the old document or the new one.

use crate::KernelError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Maximum document size accepted when loading a YAML file.
pub const MAX_DOCUMENT_SIZE: u64 = 256 * 1024 * 1024;

pub(crate) fn io_error(path: &Path, e: impl std::fmt::Display) -> KernelError {
    KernelError::Persistence(format!("{}: {}", path.display(), e))
}

/// Create the parent directory of `path` if it has one.
pub(crate) fn ensure_parent(path: &Path) -> Result<(), KernelError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace `path` with `bytes` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), KernelError> {
    ensure_parent(path)?;
    let tmp = temp_path(path);
    {
        let mut file = File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
        file.write_all(bytes).map_err(|e| io_error(&tmp, e))?;
        file.sync_all().map_err(|e| io_error(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}

/// Serialize `value` as YAML.
pub fn to_yaml<T: Serialize>(value: &T) -> Result<String, KernelError> {
    serde_yaml::to_string(value).map_err(|e| KernelError::Persistence(e.to_string()))
}

/// Parse a YAML document.
pub fn from_yaml<T: DeserializeOwned>(text: &str) -> Result<T, KernelError> {
    serde_yaml::from_str(text).map_err(|e| KernelError::Persistence(e.to_string()))
}

/// Read a file, refusing anything larger than [`MAX_DOCUMENT_SIZE`].
/// A missing file reads as `None`.
pub fn read_document(path: &Path) -> Result<Option<String>, KernelError> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    if meta.len() > MAX_DOCUMENT_SIZE {
        return Err(io_error(
            path,
            format!("{} bytes exceeds the {} byte limit", meta.len(), MAX_DOCUMENT_SIZE),
        ));
    }
    fs::read_to_string(path)
        .map(Some)
        .map_err(|e| io_error(path, e))
}
