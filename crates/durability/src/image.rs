//! Serde image of the persistent context state
//!
//! The image is data only: directory entries, lazy caches with their
//! recorded dependencies, globals, and external pointer values. Everything
//! that is code — mapper functions, lazy compute functions, reducers,
//! finalisers — is re-attached by the client after a load.

use serde::{Deserialize, Serialize};
use skfs_core::{BaseName, DirName, File, Path, Tick};

/// Persistent image of a whole context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextImage {
    /// Logical clock at save time
    pub time: Tick,
    /// All directories, in name order
    pub dirs: Vec<DirImage>,
    /// Session-scoped named values
    pub globals: Vec<(String, File)>,
    /// External pointer slots as (id, value); finalisers are not data
    pub externals: Vec<(u64, u64)>,
    /// External id allocation counter
    pub next_external: u64,
}

/// Persistent image of one directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DirImage {
    /// Materialised directory
    Eager {
        /// Directory name
        name: DirName,
        /// True for directories fed by external input writes
        is_input: bool,
        /// Source directory, when this directory is mapper-derived
        mapper_src: Option<DirName>,
        /// Directories derived from this one
        derived: Vec<DirName>,
        /// Entries in key order
        entries: Vec<EntryImage>,
        /// Reducer aggregate, when a reducer was attached
        aggregate: Option<Vec<File>>,
    },
    /// Demand-computed directory (cache only; code re-attaches on load)
    Lazy {
        /// Directory name
        name: DirName,
        /// Memoised entries in key order
        cache: Vec<LazyEntryImage>,
    },
    /// Removed-directory tombstone
    Deleted {
        /// Directory name
        name: DirName,
        /// Tick of the removal
        time: Tick,
    },
}

impl DirImage {
    /// The directory name
    pub fn name(&self) -> &DirName {
        match self {
            DirImage::Eager { name, .. } => name,
            DirImage::Lazy { name, .. } => name,
            DirImage::Deleted { name, .. } => name,
        }
    }
}

/// Persistent image of one eager entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryImage {
    /// The entry's key
    pub key: BaseName,
    /// Contributions keyed by producer; `None` is the direct-write slice
    pub slices: Vec<(Option<Path>, Vec<File>)>,
    /// Producer paths with the tick of their last contribution
    pub producers: Vec<(Path, Tick)>,
    /// Tick of the last change
    pub write_time: Tick,
    /// True for removed entries
    pub tombstone: bool,
    /// Registered reader paths
    pub readers: Vec<Path>,
}

/// Persistent image of one lazy cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LazyEntryImage {
    /// The entry's key
    pub key: BaseName,
    /// Cached values
    pub values: Vec<File>,
    /// True once a computation completed successfully
    pub has_value: bool,
    /// Dependencies recorded by the last computation
    pub deps: Vec<(Path, Tick)>,
    /// Tick the cache was produced at
    pub computed_at: Tick,
    /// Registered reader paths
    pub readers: Vec<Path>,
}
