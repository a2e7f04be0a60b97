//! Framed on-disk artifacts.
//!
//! Layout: 4-byte magic, `u32` format version, `u64` payload length,
//! SHA-256 of the payload, then the bincode payload. All integers are
//! little-endian. Writes go to `<file>.tmp`, are synced, then renamed over
//! the target so readers only ever see a complete artifact.

use crate::common::{AttendanceError, Result};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

const HEADER_LEN: usize = 4 + 4 + 8 + 32;

pub fn write_artifact<T: Serialize>(path: &Path, magic: &[u8; 4], version: u32, value: &T) -> Result<()> {
    let payload = bincode::serialize(value)
        .map_err(|e| AttendanceError::Storage(format!("Failed to serialize: {}", e)))?;
    let digest = Sha256::digest(&payload);

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(magic);
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&digest);
    bytes.extend_from_slice(&payload);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path(path);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;

    tracing::debug!("Wrote artifact {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Reads and verifies an artifact. Any structural problem is a `Storage` error.
pub fn read_artifact<T: DeserializeOwned>(path: &Path, magic: &[u8; 4], version: u32) -> Result<T> {
    let bytes = fs::read(path)?;
    decode_artifact(&bytes, magic, version)
}

pub fn decode_artifact<T: DeserializeOwned>(bytes: &[u8], magic: &[u8; 4], version: u32) -> Result<T> {
    if bytes.len() < HEADER_LEN {
        return Err(corrupt(format!("truncated header ({} bytes)", bytes.len())));
    }
    if &bytes[0..4] != magic {
        return Err(corrupt("bad magic".to_string()));
    }

    let found_version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if found_version != version {
        return Err(corrupt(format!(
            "format version mismatch: expected {}, got {}",
            version, found_version
        )));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[8..16]);
    let declared_len = u64::from_le_bytes(len_bytes);
    let payload = &bytes[HEADER_LEN..];
    if payload.len() as u64 != declared_len {
        return Err(corrupt(format!(
            "payload length mismatch: header says {}, file has {}",
            declared_len,
            payload.len()
        )));
    }

    if Sha256::digest(payload).as_slice() != &bytes[16..48] {
        return Err(corrupt("checksum mismatch".to_string()));
    }

    bincode::deserialize(payload).map_err(|e| corrupt(format!("decode failed: {}", e)))
}

/// Copies the current artifact to `<file>.backup`, if there is one.
pub fn backup(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let backup_path = sibling(path, "backup");
    fs::copy(path, &backup_path)?;
    Ok(Some(backup_path))
}

fn tmp_path(path: &Path) -> PathBuf {
    sibling(path, "tmp")
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn corrupt(reason: String) -> AttendanceError {
    AttendanceError::Storage(format!("corrupt artifact: {}", reason))
}
