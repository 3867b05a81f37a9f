//! On-disk encoding of scenario documents.
//!
//! Documents are pretty-printed JSON. Every write goes to a temporary file
//! in the destination directory which is synced and then renamed over the
//! target, so readers only ever observe a complete document.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{DataError, OpsResult};

/// Reject documents larger than this.
const MAX_DOCUMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Serializes a document.
///
/// # Errors
///
/// Returns a codec error if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> OpsResult<Vec<u8>> {
    let mut out = serde_json::to_vec_pretty(value)
        .map_err(|e| DataError::codec(format!("serialization failed: {e}")))?;
    out.push(b'\n');
    Ok(out)
}

/// Deserializes a document.
///
/// # Errors
///
/// Returns a codec error if the bytes are not a valid document.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> OpsResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| DataError::codec(format!("deserialization failed: {e}")).into())
}

/// Reads a whole file.
///
/// # Errors
///
/// Returns an I/O error, or a codec error for oversized files.
pub fn read_file(path: &Path) -> OpsResult<Vec<u8>> {
    let meta = fs::metadata(path).map_err(|e| DataError::io(path, &e))?;
    if meta.len() > MAX_DOCUMENT_SIZE {
        return Err(DataError::codec(format!(
            "{} is {} bytes, above the {MAX_DOCUMENT_SIZE} bytes limit",
            path.display(),
            meta.len()
        ))
        .into());
    }
    fs::read(path).map_err(|e| DataError::io(path, &e).into())
}

/// Reads and decodes a document file.
///
/// # Errors
///
/// Returns an I/O or codec error.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> OpsResult<T> {
    decode(&read_file(path)?)
}

/// Atomically replaces `path` with `bytes`, creating parent directories.
///
/// # Errors
///
/// Returns an I/O error if any step of the write fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> OpsResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| DataError::codec(format!("{} has no parent directory", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| DataError::io(parent, &e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| DataError::io(parent, &e))?;
    tmp.write_all(bytes).map_err(|e| DataError::io(tmp.path(), &e))?;
    tmp.as_file().sync_all().map_err(|e| DataError::io(tmp.path(), &e))?;
    tmp.persist(path).map_err(|e| DataError::io(path, &e.error))?;
    Ok(())
}

/// Encodes and atomically writes a document.
///
/// # Errors
///
/// Returns a codec or I/O error.
pub fn write_document<T: Serialize>(path: &Path, value: &T) -> OpsResult<()> {
    write_atomic(path, &encode(value)?)
}
