//! Snapshot file framing
//!
//! ## File Format
//!
//! ```text
//! [magic: 8 bytes][version: u32 LE][payload_len: u64 LE][payload][crc32: u32 LE]
//! ```
//!
//! - **magic**: `SKFSSNAP`, distinguishes incompatible builds
//! - **version**: format version; bumped on any layout change
//! - **payload**: bincode-serialized [`ContextImage`](crate::ContextImage)
//! - **crc32**: checksum over the payload, for corruption detection
//!
//! The length field enables a cheap truncation check before the CRC pass;
//! the magic and version reject foreign or stale files with a precise error
//! instead of a decode failure deep inside bincode.

use skfs_core::{SkfsError, SkfsResult};

/// Leading magic bytes of every snapshot file
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"SKFSSNAP";

/// Current snapshot format version
pub const FORMAT_VERSION: u32 = 3;

/// Header size: magic + version + payload length
const HEADER_SIZE: usize = 8 + 4 + 8;

/// Frame a payload for writing
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + 4);
    buf.extend_from_slice(SNAPSHOT_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buf
}

/// Validate a frame and return its payload
///
/// # Errors
///
/// - `PersistenceMagicMismatch` for a wrong magic or format version
/// - `CorruptSnapshot` for truncation, length, or CRC failures
pub fn decode_frame(bytes: &[u8]) -> SkfsResult<&[u8]> {
    if bytes.len() < HEADER_SIZE + 4 {
        return Err(SkfsError::CorruptSnapshot {
            reason: format!("file too short: {} bytes", bytes.len()),
        });
    }
    if &bytes[0..8] != SNAPSHOT_MAGIC {
        return Err(SkfsError::PersistenceMagicMismatch {
            found: bytes[0..8].to_vec(),
        });
    }
    let version = u32::from_le_bytes(bytes[8..12].try_into().expect("length checked"));
    if version != FORMAT_VERSION {
        return Err(SkfsError::PersistenceMagicMismatch {
            found: bytes[0..12].to_vec(),
        });
    }
    let payload_len = u64::from_le_bytes(bytes[12..20].try_into().expect("length checked")) as usize;
    let expected = HEADER_SIZE + payload_len + 4;
    if bytes.len() != expected {
        return Err(SkfsError::CorruptSnapshot {
            reason: format!("expected {} bytes, found {}", expected, bytes.len()),
        });
    }
    let payload = &bytes[HEADER_SIZE..HEADER_SIZE + payload_len];
    let stored_crc = u32::from_le_bytes(
        bytes[HEADER_SIZE + payload_len..]
            .try_into()
            .expect("length checked"),
    );
    let actual_crc = crc32fast::hash(payload);
    if stored_crc != actual_crc {
        return Err(SkfsError::CorruptSnapshot {
            reason: format!("crc mismatch: stored {stored_crc:#010x}, computed {actual_crc:#010x}"),
        });
    }
    Ok(payload)
}
