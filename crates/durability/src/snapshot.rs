//! Snapshot writing and loading
//!
//! Saves are atomic: the frame is written to a sibling temp file, fsynced,
//! and renamed over the target, so a crash mid-write leaves the previous
//! snapshot intact. Loads validate magic, version, length, and CRC before
//! any decoding happens.

use crate::encoding::{decode_frame, encode_frame};
use crate::image::ContextImage;
use skfs_core::{SkfsError, SkfsResult};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Write a context image to `path` atomically
///
/// # Errors
///
/// Returns `CorruptSnapshot` on serialization failure and `StorageError` on
/// any I/O failure.
pub fn save_snapshot(image: &ContextImage, path: &Path) -> SkfsResult<()> {
    let payload = bincode::serialize(image).map_err(|e| SkfsError::CorruptSnapshot {
        reason: format!("serialize: {e}"),
    })?;
    let framed = encode_frame(&payload);

    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&framed)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    info!(
        path = %path.display(),
        bytes = framed.len(),
        dirs = image.dirs.len(),
        "snapshot saved"
    );
    Ok(())
}

/// Load a context image from `path`
///
/// # Errors
///
/// Returns `StorageError` on I/O failure, `PersistenceMagicMismatch` for a
/// foreign or stale file, and `CorruptSnapshot` for CRC or decode failures.
pub fn load_snapshot(path: &Path) -> SkfsResult<ContextImage> {
    let bytes = fs::read(path)?;
    let payload = decode_frame(&bytes)?;
    let image: ContextImage =
        bincode::deserialize(payload).map_err(|e| SkfsError::CorruptSnapshot {
            reason: format!("deserialize: {e}"),
        })?;
    info!(
        path = %path.display(),
        bytes = bytes.len(),
        dirs = image.dirs.len(),
        time = %image.time,
        "snapshot loaded"
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skfs_core::{ErrorCode, Tick};
    use tempfile::TempDir;

    fn empty_image() -> ContextImage {
        ContextImage {
            time: Tick::from_raw(7),
            dirs: Vec::new(),
            globals: Vec::new(),
            externals: vec![(0, 42)],
            next_external: 1,
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.skfs");
        save_snapshot(&empty_image(), &path).unwrap();

        let loaded = load_snapshot(&path).unwrap();
        assert_eq!(loaded.time, Tick::from_raw(7));
        assert_eq!(loaded.externals, vec![(0, 42)]);
        assert_eq!(loaded.next_external, 1);
    }

    #[test]
    fn test_save_replaces_existing_atomically() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.skfs");
        save_snapshot(&empty_image(), &path).unwrap();

        let mut second = empty_image();
        second.time = Tick::from_raw(9);
        save_snapshot(&second, &path).unwrap();

        assert_eq!(load_snapshot(&path).unwrap().time, Tick::from_raw(9));
        // No temp file left behind.
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_load_missing_file_is_storage_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_snapshot(&tmp.path().join("absent.skfs")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StorageError);
    }

    #[test]
    fn test_load_garbage_is_magic_mismatch() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.skfs");
        fs::write(&path, b"not a snapshot at all....").unwrap();
        let err = load_snapshot(&path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PersistenceMagicMismatch);
    }
}
