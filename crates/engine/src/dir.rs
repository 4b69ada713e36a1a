//! Directory variants
//!
//! Every `DirName` in a context resolves to exactly one of these. A deleted
//! directory leaves a tombstone that answers all queries as empty until GC
//! drops it; recreating the name through `mkdir` is allowed.

use crate::eager::EagerDir;
use crate::lazy::LazyDir;
use skfs_core::{DirName, Tick};

/// A removed directory's tombstone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedDir {
    /// The removed name
    pub name: DirName,
    /// Tick of the removal
    pub time: Tick,
}

/// A directory owned by the context
#[derive(Clone)]
pub enum Dir {
    /// Materialised by writes
    Eager(EagerDir),
    /// Computed on demand
    Lazy(LazyDir),
    /// Removed; answers all queries as empty
    Deleted(DeletedDir),
}

impl Dir {
    /// The directory name
    pub fn name(&self) -> &DirName {
        match self {
            Dir::Eager(d) => d.name(),
            Dir::Lazy(d) => d.name(),
            Dir::Deleted(d) => &d.name,
        }
    }

    /// The variant name, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Dir::Eager(_) => "eager",
            Dir::Lazy(_) => "lazy",
            Dir::Deleted(_) => "deleted",
        }
    }
}
