//! Error types for the SKFS engine
//!
//! `SkfsError` is the unified error type for all engine APIs. Every variant
//! maps to one canonical code; the codes are the frozen wire representation.
//!
//! ## Canonical Error Codes (Frozen)
//!
//! | Code | Description |
//! |------|-------------|
//! | DirNotFound | Unknown directory name |
//! | DirTypeMismatch | Directory exists with a different variant |
//! | DuplicateDir | `mkdir` over a live directory |
//! | WriteToDeletedDir | Write through a deleted-directory tombstone |
//! | CycleDetected | Lazy re-entry during computation (tolerated) |
//! | ComputeFailure | A mapper or lazy compute function failed |
//! | InvalidDirName | Directory name failed validation |
//! | InvalidKey | String key failed validation |
//! | DecodeError | File payload did not match the requested type |
//! | PersistenceMagicMismatch | Snapshot magic or format version mismatch |
//! | CorruptSnapshot | Snapshot failed CRC, length, or decoding checks |
//! | StorageError | Disk I/O failure |
//! | ExternalPointerInvalid | Unknown external pointer id |
//!
//! ## Classification
//!
//! - **Retryable**: `CycleDetected`, `ComputeFailure` — the entry keeps its
//!   stale cache and stays dirty; the next `update()` retries.
//! - **Fatal in frame**: everything else — the calling frame aborts with the
//!   error; the engine commits nothing for that tick.

use crate::types::{DirName, Path};
use std::io;
use thiserror::Error;

// =============================================================================
// ErrorCode - Canonical Wire Codes (Frozen)
// =============================================================================

/// Canonical error codes
///
/// The stable wire representation of all engine errors. Frozen; new variants
/// require a format version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Unknown directory name
    DirNotFound,
    /// Directory exists with a different variant
    DirTypeMismatch,
    /// `mkdir` over a live directory
    DuplicateDir,
    /// Write through a deleted-directory tombstone
    WriteToDeletedDir,
    /// Lazy re-entry during computation (tolerated)
    CycleDetected,
    /// A mapper or lazy compute function failed
    ComputeFailure,
    /// Directory name failed validation
    InvalidDirName,
    /// String key failed validation
    InvalidKey,
    /// File payload did not match the requested type
    DecodeError,
    /// Snapshot magic or format version mismatch
    PersistenceMagicMismatch,
    /// Snapshot failed CRC, length, or decoding checks
    CorruptSnapshot,
    /// Disk I/O failure
    StorageError,
    /// Unknown external pointer id
    ExternalPointerInvalid,
}

impl ErrorCode {
    /// Canonical string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DirNotFound => "DirNotFound",
            ErrorCode::DirTypeMismatch => "DirTypeMismatch",
            ErrorCode::DuplicateDir => "DuplicateDir",
            ErrorCode::WriteToDeletedDir => "WriteToDeletedDir",
            ErrorCode::CycleDetected => "CycleDetected",
            ErrorCode::ComputeFailure => "ComputeFailure",
            ErrorCode::InvalidDirName => "InvalidDirName",
            ErrorCode::InvalidKey => "InvalidKey",
            ErrorCode::DecodeError => "DecodeError",
            ErrorCode::PersistenceMagicMismatch => "PersistenceMagicMismatch",
            ErrorCode::CorruptSnapshot => "CorruptSnapshot",
            ErrorCode::StorageError => "StorageError",
            ErrorCode::ExternalPointerInvalid => "ExternalPointerInvalid",
        }
    }

    /// Parse a code from its string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DirNotFound" => Some(ErrorCode::DirNotFound),
            "DirTypeMismatch" => Some(ErrorCode::DirTypeMismatch),
            "DuplicateDir" => Some(ErrorCode::DuplicateDir),
            "WriteToDeletedDir" => Some(ErrorCode::WriteToDeletedDir),
            "CycleDetected" => Some(ErrorCode::CycleDetected),
            "ComputeFailure" => Some(ErrorCode::ComputeFailure),
            "InvalidDirName" => Some(ErrorCode::InvalidDirName),
            "InvalidKey" => Some(ErrorCode::InvalidKey),
            "DecodeError" => Some(ErrorCode::DecodeError),
            "PersistenceMagicMismatch" => Some(ErrorCode::PersistenceMagicMismatch),
            "CorruptSnapshot" => Some(ErrorCode::CorruptSnapshot),
            "StorageError" => Some(ErrorCode::StorageError),
            "ExternalPointerInvalid" => Some(ErrorCode::ExternalPointerInvalid),
            _ => None,
        }
    }
}

// =============================================================================
// SkfsError
// =============================================================================

/// Result alias used across the workspace
pub type SkfsResult<T> = Result<T, SkfsError>;

/// Unified error type for all engine APIs
#[derive(Debug, Error)]
pub enum SkfsError {
    /// Unknown directory name
    #[error("directory not found: {dir}")]
    DirNotFound {
        /// The missing directory
        dir: DirName,
    },

    /// Directory exists with a different variant
    #[error("directory {dir} is {actual}, expected {expected}")]
    DirTypeMismatch {
        /// The directory
        dir: DirName,
        /// Variant required by the caller
        expected: &'static str,
        /// Variant actually present
        actual: &'static str,
    },

    /// `mkdir` over a live directory
    #[error("directory already exists: {dir}")]
    DuplicateDir {
        /// The occupied name
        dir: DirName,
    },

    /// Write through a deleted-directory tombstone
    #[error("write to deleted directory: {dir}")]
    WriteToDeletedDir {
        /// The deleted directory
        dir: DirName,
    },

    /// Lazy re-entry during computation; tolerated, never escapes a force
    #[error("dependency cycle through {path}")]
    CycleDetected {
        /// The re-entered cell
        path: Path,
    },

    /// A mapper or lazy compute function failed
    #[error("compute failed at {path}: {message}")]
    ComputeFailure {
        /// The cell whose producer failed
        path: Path,
        /// Failure description from the producer
        message: String,
    },

    /// Directory name failed validation
    #[error("invalid directory name: {source}")]
    InvalidDirName {
        /// The violated rule
        #[source]
        source: crate::limits::NameError,
    },

    /// String key failed validation
    #[error("invalid key: {source}")]
    InvalidKey {
        /// The violated rule
        #[source]
        source: crate::limits::NameError,
    },

    /// File payload did not match the requested type
    #[error("decode error: expected {expected}, found {actual}")]
    DecodeError {
        /// Payload kind the caller asked for
        expected: &'static str,
        /// Payload kind actually present
        actual: &'static str,
    },

    /// Snapshot magic or format version mismatch
    #[error("snapshot magic mismatch: found {found:?}")]
    PersistenceMagicMismatch {
        /// The leading bytes actually read
        found: Vec<u8>,
    },

    /// Snapshot failed CRC, length, or decoding checks
    #[error("corrupt snapshot: {reason}")]
    CorruptSnapshot {
        /// What check failed
        reason: String,
    },

    /// Disk I/O failure
    #[error("storage error: {0}")]
    StorageError(#[from] io::Error),

    /// Unknown external pointer id
    #[error("invalid external pointer: {id}")]
    ExternalPointerInvalid {
        /// The unknown id
        id: u64,
    },
}

impl SkfsError {
    /// The canonical code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            SkfsError::DirNotFound { .. } => ErrorCode::DirNotFound,
            SkfsError::DirTypeMismatch { .. } => ErrorCode::DirTypeMismatch,
            SkfsError::DuplicateDir { .. } => ErrorCode::DuplicateDir,
            SkfsError::WriteToDeletedDir { .. } => ErrorCode::WriteToDeletedDir,
            SkfsError::CycleDetected { .. } => ErrorCode::CycleDetected,
            SkfsError::ComputeFailure { .. } => ErrorCode::ComputeFailure,
            SkfsError::InvalidDirName { .. } => ErrorCode::InvalidDirName,
            SkfsError::InvalidKey { .. } => ErrorCode::InvalidKey,
            SkfsError::DecodeError { .. } => ErrorCode::DecodeError,
            SkfsError::PersistenceMagicMismatch { .. } => ErrorCode::PersistenceMagicMismatch,
            SkfsError::CorruptSnapshot { .. } => ErrorCode::CorruptSnapshot,
            SkfsError::StorageError(_) => ErrorCode::StorageError,
            SkfsError::ExternalPointerInvalid { .. } => ErrorCode::ExternalPointerInvalid,
        }
    }

    /// True for the per-entry retryable class
    ///
    /// Retryable errors leave the previous cached value in place and keep the
    /// entry dirty; the next `update()` retries the computation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SkfsError::CycleDetected { .. } | SkfsError::ComputeFailure { .. }
        )
    }

    /// Build a `DecodeError`
    pub fn decode(expected: &'static str, actual: &'static str) -> Self {
        SkfsError::DecodeError { expected, actual }
    }

    /// Build a `ComputeFailure` from a producer's message
    pub fn compute(path: Path, message: impl Into<String>) -> Self {
        SkfsError::ComputeFailure {
            path,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BaseName, DirName};

    fn dir(name: &str) -> DirName {
        DirName::new(name).unwrap()
    }

    #[test]
    fn test_code_string_roundtrip() {
        let codes = [
            ErrorCode::DirNotFound,
            ErrorCode::DirTypeMismatch,
            ErrorCode::DuplicateDir,
            ErrorCode::WriteToDeletedDir,
            ErrorCode::CycleDetected,
            ErrorCode::ComputeFailure,
            ErrorCode::InvalidDirName,
            ErrorCode::InvalidKey,
            ErrorCode::DecodeError,
            ErrorCode::PersistenceMagicMismatch,
            ErrorCode::CorruptSnapshot,
            ErrorCode::StorageError,
            ErrorCode::ExternalPointerInvalid,
        ];
        for code in codes {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("NoSuchCode"), None);
    }

    #[test]
    fn test_retryable_classification() {
        let cycle = SkfsError::CycleDetected {
            path: dir("/a/").path(BaseName::iid(0)),
        };
        assert!(cycle.is_retryable());

        let missing = SkfsError::DirNotFound { dir: dir("/a/") };
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_error_messages_name_the_cell() {
        let err = SkfsError::compute(dir("/out/").path(BaseName::iid(3)), "boom");
        assert_eq!(err.to_string(), "compute failed at /out/3: boom");
        assert_eq!(err.code(), ErrorCode::ComputeFailure);
    }
}
