//! Size limits for names and keys
//!
//! Validation rules enforced at every construction site:
//! - Directory names start and end with `/`, are non-empty, contain no NUL,
//!   and respect `max_dir_name_bytes`
//! - String keys are non-empty, contain no NUL, and respect `max_key_bytes`

use thiserror::Error;

/// Size limits for identifiers and values
///
/// The defaults are generous; custom limits are threaded through the
/// `*_with_limits` constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum directory name length in bytes
    pub max_dir_name_bytes: usize,
    /// Maximum string key length in bytes
    pub max_key_bytes: usize,
    /// Maximum number of files in one entry's value array
    pub max_value_files: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_dir_name_bytes: 1024,
            max_key_bytes: 4096,
            max_value_files: usize::MAX,
        }
    }
}

/// Name validation errors
///
/// These errors map to the `InvalidDirName` / `InvalidKey` error codes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    /// Name is empty
    #[error("name cannot be empty")]
    Empty,

    /// Directory name does not start with `/`
    #[error("directory name must start with '/'")]
    MissingLeadingSlash,

    /// Directory name does not end with `/`
    #[error("directory name must end with '/'")]
    MissingTrailingSlash,

    /// Name contains a NUL byte
    #[error("name cannot contain NUL bytes")]
    ContainsNul,

    /// Name exceeds the configured limit
    #[error("name too long: {actual} bytes exceeds maximum {max}")]
    TooLong {
        /// Actual length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },
}

/// Validate a directory name
///
/// # Errors
///
/// Returns the first violated rule.
pub fn validate_dir_name(name: &str, limits: &Limits) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if !name.starts_with('/') {
        return Err(NameError::MissingLeadingSlash);
    }
    if !name.ends_with('/') {
        return Err(NameError::MissingTrailingSlash);
    }
    if name.contains('\x00') {
        return Err(NameError::ContainsNul);
    }
    if name.len() > limits.max_dir_name_bytes {
        return Err(NameError::TooLong {
            actual: name.len(),
            max: limits.max_dir_name_bytes,
        });
    }
    Ok(())
}

/// Validate a string key
///
/// # Errors
///
/// Returns the first violated rule.
pub fn validate_sid(key: &str, limits: &Limits) -> Result<(), NameError> {
    if key.is_empty() {
        return Err(NameError::Empty);
    }
    if key.contains('\x00') {
        return Err(NameError::ContainsNul);
    }
    if key.len() > limits.max_key_bytes {
        return Err(NameError::TooLong {
            actual: key.len(),
            max: limits.max_key_bytes,
        });
    }
    Ok(())
}
