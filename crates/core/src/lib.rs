//! Core types for SKFS
//!
//! This crate defines the foundational types used throughout the engine:
//! - BaseName: Directory key (string or integer)
//! - DirName: Validated absolute directory name
//! - Path: (DirName, BaseName) pair identifying a cell
//! - Tick: Monotonic logical clock
//! - File: Interned immutable value
//! - Interner: Canonical table making structural equality coincide with identity
//! - SkfsError: Error type hierarchy with frozen wire codes
//! - Limits: Size limits for directory names and keys

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod file;
pub mod intern;
pub mod limits;
pub mod types;

pub use error::{ErrorCode, SkfsError, SkfsResult};
pub use file::{ExternalId, File, FileData, FileDecode};
pub use intern::Interner;
pub use limits::{Limits, NameError};
pub use types::{BaseName, DirName, Path, Tick};
