//! Lazy directories
//!
//! A lazy directory computes entries on demand through a user function and
//! memoises the result. Each cached entry remembers the dependencies the
//! computation read (path and write time), the tick it completed at, and the
//! readers that consumed it.
//!
//! The per-entry state machine tolerates cycles: an entry is marked
//! `InFlight` for the duration of its computation, and re-entering it from
//! its own call chain yields the stale cached value (or empty) instead of
//! recursing. The entry is left `Dirty` in that case and the next update
//! drives the graph to a fixed point.

use skfs_core::{BaseName, DirName, File, Path, SkfsResult, Tick};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Compute function of a lazy directory
///
/// Called with the context, the directory's own name, and the demanded key.
/// Reads performed through dependency-recording accessors become the entry's
/// dependencies.
pub type LazyFn =
    Arc<dyn Fn(&mut crate::Context, &DirName, &BaseName) -> SkfsResult<Vec<File>> + Send + Sync>;

/// Lifecycle of one lazy cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyState {
    /// Cache is valid against the recorded dependencies
    Clean,
    /// A dependency advanced (or the computation failed); recompute on demand
    Dirty,
    /// The computation is currently on the stack
    InFlight,
}

/// One memoised cell of a lazy directory
#[derive(Clone)]
pub struct LazyEntry {
    pub(crate) state: LazyState,
    pub(crate) values: Vec<File>,
    /// False until the first successful computation
    pub(crate) has_value: bool,
    pub(crate) deps: Vec<(Path, Tick)>,
    pub(crate) computed_at: Tick,
    pub(crate) readers: BTreeSet<Path>,
}

impl LazyEntry {
    pub(crate) fn new() -> Self {
        LazyEntry {
            state: LazyState::Dirty,
            values: Vec::new(),
            has_value: false,
            deps: Vec::new(),
            computed_at: Tick::ZERO,
            readers: BTreeSet::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> LazyState {
        self.state
    }

    /// The cached value array; meaningful only after the first computation
    pub fn values(&self) -> &[File] {
        &self.values
    }

    /// True once a computation has completed successfully
    pub fn has_value(&self) -> bool {
        self.has_value
    }

    /// Dependencies recorded by the last computation
    pub fn deps(&self) -> &[(Path, Tick)] {
        &self.deps
    }

    /// Tick at which the cache was produced
    pub fn computed_at(&self) -> Tick {
        self.computed_at
    }
}

/// A directory whose contents are computed on demand
#[derive(Clone)]
pub struct LazyDir {
    name: DirName,
    /// Code is not persisted; `None` after a snapshot load until re-attached
    pub(crate) compute: Option<LazyFn>,
    pub(crate) cache: BTreeMap<BaseName, LazyEntry>,
}

impl LazyDir {
    /// Create a lazy directory with its compute function
    pub fn new(name: DirName, compute: LazyFn) -> Self {
        LazyDir {
            name,
            compute: Some(compute),
            cache: BTreeMap::new(),
        }
    }

    pub(crate) fn data_only(name: DirName, cache: BTreeMap<BaseName, LazyEntry>) -> Self {
        LazyDir {
            name,
            compute: None,
            cache,
        }
    }

    /// The directory name
    pub fn name(&self) -> &DirName {
        &self.name
    }

    /// The cached entry for a key, if any
    pub fn entry(&self, key: &BaseName) -> Option<&LazyEntry> {
        self.cache.get(key)
    }

    /// Ordered keys that have been demanded at least once
    pub fn keys(&self) -> Vec<BaseName> {
        self.cache.keys().cloned().collect()
    }
}
