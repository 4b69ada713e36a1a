//! Identifier types for the directory graph
//!
//! This module defines the names and the clock that index every cell in the
//! engine:
//! - `BaseName`: a directory key, either a string (`Sid`) or an integer (`Iid`)
//! - `DirName`: a validated absolute directory name (`/a/b/`)
//! - `Path`: a `(DirName, BaseName)` pair identifying one cell
//! - `Tick`: the monotonic logical clock stamped on every write
//!
//! ## Ordering
//!
//! All identifier types are totally ordered. `BaseName` orders every `Iid`
//! before every `Sid`; within a variant the natural order applies. `Path`
//! orders by directory first, then key. The drain loop in the engine relies
//! on these orders for deterministic recomputation.

use crate::limits::{validate_dir_name, validate_sid, Limits, NameError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Tick - Logical Clock
// =============================================================================

/// Monotonic logical clock value
///
/// Every write and recomputation is stamped with a `Tick`. Ticks are strictly
/// increasing across writes observed by any single reader; two writes may
/// share a tick only when they belong to the same batch and target disjoint
/// paths.
///
/// `Tick::ZERO` is the pre-history sentinel: no write ever carries it, so a
/// dependency recorded at `ZERO` is always older than any real write.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Tick(u64);

impl Tick {
    /// Pre-history sentinel; strictly less than every real tick
    pub const ZERO: Tick = Tick(0);

    /// Maximum representable tick
    pub const MAX: Tick = Tick(u64::MAX);

    /// Create a tick from a raw counter value
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Tick(raw)
    }

    /// Raw counter value
    #[inline]
    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    /// The successor tick
    ///
    /// Saturates at `Tick::MAX`; a process would need centuries of writes to
    /// reach it.
    #[inline]
    #[must_use]
    pub const fn next(&self) -> Self {
        Tick(self.0.saturating_add(1))
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

// =============================================================================
// BaseName - Directory Keys
// =============================================================================

/// A directory key
///
/// Keys are either interned strings (`Sid`) or integers (`Iid`). The order is
/// total: every `Iid` sorts before every `Sid`, integers by value, strings
/// bytewise. Keys are cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BaseName {
    /// Integer key
    Iid(i64),
    /// String key
    Sid(Arc<str>),
}

impl BaseName {
    /// Create an integer key
    #[inline]
    pub const fn iid(id: i64) -> Self {
        BaseName::Iid(id)
    }

    /// Create a string key, validating against default limits
    ///
    /// # Errors
    ///
    /// Returns `NameError` if the string is empty, contains NUL, or exceeds
    /// `Limits::max_key_bytes`.
    pub fn sid(s: impl AsRef<str>) -> Result<Self, NameError> {
        Self::sid_with_limits(s, &Limits::default())
    }

    /// Create a string key with custom limits
    ///
    /// # Errors
    ///
    /// Returns `NameError` if validation fails.
    pub fn sid_with_limits(s: impl AsRef<str>, limits: &Limits) -> Result<Self, NameError> {
        let s = s.as_ref();
        validate_sid(s, limits)?;
        Ok(BaseName::Sid(Arc::from(s)))
    }

    /// True if this is a string key
    #[inline]
    pub fn is_sid(&self) -> bool {
        matches!(self, BaseName::Sid(_))
    }

    /// The string payload, if this is a `Sid`
    pub fn as_sid(&self) -> Option<&str> {
        match self {
            BaseName::Sid(s) => Some(s),
            BaseName::Iid(_) => None,
        }
    }

    /// The integer payload, if this is an `Iid`
    pub fn as_iid(&self) -> Option<i64> {
        match self {
            BaseName::Iid(id) => Some(*id),
            BaseName::Sid(_) => None,
        }
    }
}

impl fmt::Display for BaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseName::Iid(id) => write!(f, "{}", id),
            BaseName::Sid(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for BaseName {
    fn from(id: i64) -> Self {
        BaseName::Iid(id)
    }
}

// =============================================================================
// DirName - Directory Names
// =============================================================================

/// A validated absolute directory name
///
/// Directory names are path-like strings: they start and end with `/`, are
/// never empty, contain no NUL bytes, and respect `Limits::max_dir_name_bytes`.
/// A `DirName` is unique per context and is never renamed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DirName(Arc<str>);

impl DirName {
    /// Create a directory name, validating against default limits
    ///
    /// # Errors
    ///
    /// Returns `NameError` if the name does not start and end with `/`,
    /// contains NUL, or exceeds the length limit.
    pub fn new(name: impl AsRef<str>) -> Result<Self, NameError> {
        Self::with_limits(name, &Limits::default())
    }

    /// Create a directory name with custom limits
    ///
    /// # Errors
    ///
    /// Returns `NameError` if validation fails.
    pub fn with_limits(name: impl AsRef<str>, limits: &Limits) -> Result<Self, NameError> {
        let name = name.as_ref();
        validate_dir_name(name, limits)?;
        Ok(DirName(Arc::from(name)))
    }

    /// The directory name as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the path of a cell inside this directory
    pub fn path(&self, key: BaseName) -> Path {
        Path {
            dir: self.clone(),
            key,
        }
    }
}

impl fmt::Display for DirName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Path - Cell Identity
// =============================================================================

/// Identity of one cell: a directory name plus a key
///
/// Paths order by directory first, then key, which gives the engine its
/// deterministic drain order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Path {
    /// The directory holding the cell
    pub dir: DirName,
    /// The key within the directory
    pub key: BaseName,
}

impl Path {
    /// Create a path from its parts
    pub fn new(dir: DirName, key: BaseName) -> Self {
        Path { dir, key }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dir, self.key)
    }
}
