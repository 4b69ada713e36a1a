//! The mutable root of the computation graph
//!
//! A `Context` owns every directory, the logical clock, the pending dirty
//! set, the interner, the external pointer registry, and the subscription
//! table. All engine operations go through it; there is no ambient state.
//!
//! ## Write path
//!
//! Writes are applied in batches. A batch reserves one tick; if any entry
//! actually changes (identity-equal rewrites are suppressed) the tick is
//! committed, the changed entries' readers are marked dirty, derived
//! directories get one dirty producer path per changed key, and an attached
//! reducer observes a single aggregated delta for the whole batch.
//!
//! ## Update
//!
//! [`Context::update`] drains the dirty set smallest-path-first. Eager
//! producer paths re-run their mapper for that one source key; lazy paths
//! recompute in place when they hold a cached value, propagating dirt to
//! their readers only when the recomputed value differs. Failures are kept
//! per-entry: the stale value stays, the path stays dirty, and the next
//! update retries.

use crate::dir::{DeletedDir, Dir};
use crate::eager::{same_values, EagerDir};
use crate::external::{ExternalRegistry, Finalizer};
use crate::handle::EHandle;
use crate::lazy::{LazyDir, LazyEntry, LazyFn, LazyState};
use crate::mapper::{MapperFn, MapperSpec, Writer};
use crate::reduce::{Reducer, ReducerState};
use crate::session::{ChangeEvent, SubId, Subscriptions};
use crate::stats::EngineStats;
use crate::track::Tracker;
use skfs_core::{
    BaseName, DirName, ExternalId, File, FileData, FileDecode, Interner, Path, SkfsError,
    SkfsResult, Tick,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// One write operation inside a batch
///
/// The producer addresses a slice (`None` is the direct slice); `None` values
/// remove the addressed slice or entry.
pub(crate) type BatchOp = (BaseName, Option<Path>, Option<Vec<File>>);

/// How the context came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Built from scratch; registrations create directories
    Fresh,
    /// Restored from a snapshot; registrations re-attach code to loaded data
    Loaded,
}

/// The mutable root owning all directories and the current time
pub struct Context {
    pub(crate) time: Tick,
    pub(crate) dirs: BTreeMap<DirName, Dir>,
    pub(crate) dirty_readers: BTreeSet<Path>,
    pub(crate) globals: BTreeMap<String, File>,
    pub(crate) interner: Interner,
    pub(crate) externals: ExternalRegistry,
    pub(crate) subs: Subscriptions,
    pub(crate) stats: EngineStats,
    pub(crate) session: SessionKind,
    /// Changed keys accumulated since the last flush to subscribers
    pub(crate) changed: BTreeMap<DirName, BTreeSet<BaseName>>,
    tracker: Tracker,
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

// Field-precise helpers; mutation paths need `dirs` and other context fields
// borrowed at the same time, which `&mut self` methods would forbid.

fn eager_mut<'a>(
    dirs: &'a mut BTreeMap<DirName, Dir>,
    name: &DirName,
) -> SkfsResult<&'a mut EagerDir> {
    match dirs.get_mut(name) {
        Some(Dir::Eager(dir)) => Ok(dir),
        Some(other) => Err(SkfsError::DirTypeMismatch {
            dir: name.clone(),
            expected: "eager",
            actual: other.kind(),
        }),
        None => Err(SkfsError::DirNotFound { dir: name.clone() }),
    }
}

fn lazy_mut<'a>(
    dirs: &'a mut BTreeMap<DirName, Dir>,
    name: &DirName,
) -> SkfsResult<&'a mut LazyDir> {
    match dirs.get_mut(name) {
        Some(Dir::Lazy(dir)) => Ok(dir),
        Some(other) => Err(SkfsError::DirTypeMismatch {
            dir: name.clone(),
            expected: "lazy",
            actual: other.kind(),
        }),
        None => Err(SkfsError::DirNotFound { dir: name.clone() }),
    }
}

/// Current time of a cell, for dependency validation
fn current_write_time(dirs: &BTreeMap<DirName, Dir>, path: &Path) -> Tick {
    match dirs.get(&path.dir) {
        Some(Dir::Eager(dir)) => dir.write_time_of(&path.key),
        Some(Dir::Lazy(dir)) => dir
            .cache
            .get(&path.key)
            .map(|e| e.computed_at)
            .unwrap_or(Tick::ZERO),
        Some(Dir::Deleted(dir)) => dir.time,
        None => Tick::MAX,
    }
}

impl Context {
    /// Create an empty fresh context
    pub fn new() -> Self {
        Context {
            time: Tick::ZERO,
            dirs: BTreeMap::new(),
            dirty_readers: BTreeSet::new(),
            globals: BTreeMap::new(),
            interner: Interner::new(),
            externals: ExternalRegistry::default(),
            subs: Subscriptions::default(),
            stats: EngineStats::default(),
            session: SessionKind::Fresh,
            changed: BTreeMap::new(),
            tracker: Tracker::default(),
        }
    }

    /// Current logical time
    pub fn time(&self) -> Tick {
        self.time
    }

    /// How the context came to exist
    pub fn session(&self) -> SessionKind {
        self.session
    }

    /// Engine counters
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// True while paths await recomputation
    pub fn has_dirty(&self) -> bool {
        !self.dirty_readers.is_empty()
    }

    fn bump(&mut self) -> Tick {
        self.time = self.time.next();
        self.time
    }

    // =========================================================================
    // Interning
    // =========================================================================

    /// Intern a payload into the canonical `File`
    pub fn intern(&mut self, data: FileData) -> File {
        self.interner.intern(data)
    }

    /// Re-intern a file that may come from another table
    pub fn intern_file(&mut self, file: File) -> File {
        self.interner.intern_file(file)
    }

    /// Encode and intern a client value
    pub fn intern_value<T: FileDecode>(&mut self, value: &T) -> File {
        let data = value.encode();
        self.interner.intern(data)
    }

    // =========================================================================
    // Directory lifecycle
    // =========================================================================

    /// Create an eager directory
    ///
    /// Replaces a deleted-directory tombstone of the same name. In a loaded
    /// session an existing eager directory is re-opened instead.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateDir` when the name is occupied by a live directory.
    pub fn mkdir<T: FileDecode>(
        &mut self,
        name: &DirName,
        is_input: bool,
        initial: Vec<(BaseName, Vec<File>)>,
    ) -> SkfsResult<EHandle<T>> {
        match self.dirs.get(name) {
            None => {}
            Some(Dir::Deleted(_)) => {
                self.dirs.remove(name);
            }
            Some(Dir::Eager(_)) if self.session == SessionKind::Loaded => {
                return Ok(EHandle::new(name.clone()));
            }
            Some(_) => return Err(SkfsError::DuplicateDir { dir: name.clone() }),
        }
        self.dirs
            .insert(name.clone(), Dir::Eager(EagerDir::new(name.clone(), is_input)));
        debug!(dir = %name, is_input, "created eager directory");
        if !initial.is_empty() {
            let ops: Vec<BatchOp> = initial.into_iter().map(|(k, v)| (k, None, Some(v))).collect();
            self.apply_batch(name, ops)?;
        }
        Ok(EHandle::new(name.clone()))
    }

    /// Structural lookup
    ///
    /// # Errors
    ///
    /// Returns `DirNotFound` for unknown names.
    pub fn unsafe_get_dir(&self, name: &DirName) -> SkfsResult<&Dir> {
        self.dirs
            .get(name)
            .ok_or_else(|| SkfsError::DirNotFound { dir: name.clone() })
    }

    /// Variant-narrowing lookup
    ///
    /// # Errors
    ///
    /// Returns `DirNotFound` or `DirTypeMismatch`.
    pub fn unsafe_get_eager_dir(&self, name: &DirName) -> SkfsResult<&EagerDir> {
        match self.unsafe_get_dir(name)? {
            Dir::Eager(dir) => Ok(dir),
            other => Err(SkfsError::DirTypeMismatch {
                dir: name.clone(),
                expected: "eager",
                actual: other.kind(),
            }),
        }
    }

    /// Like [`Context::unsafe_get_eager_dir`] but `None` on any miss
    pub fn maybe_get_eager_dir(&self, name: &DirName) -> Option<&EagerDir> {
        match self.dirs.get(name) {
            Some(Dir::Eager(dir)) => Some(dir),
            _ => None,
        }
    }

    /// Variant-narrowing lookup for lazy directories
    ///
    /// # Errors
    ///
    /// Returns `DirNotFound` or `DirTypeMismatch`.
    pub fn unsafe_get_lazy_dir(&self, name: &DirName) -> SkfsResult<&LazyDir> {
        match self.unsafe_get_dir(name)? {
            Dir::Lazy(dir) => Ok(dir),
            other => Err(SkfsError::DirTypeMismatch {
                dir: name.clone(),
                expected: "lazy",
                actual: other.kind(),
            }),
        }
    }

    /// Atomic directory replacement, used by the mapper infrastructure
    pub fn set_dir(&mut self, dir: Dir) {
        self.dirs.insert(dir.name().clone(), dir);
    }

    /// Remove a directory, leaving a tombstone that answers queries as empty
    ///
    /// # Errors
    ///
    /// Returns `DirNotFound` for unknown names.
    pub fn remove_dir(&mut self, name: &DirName) -> SkfsResult<()> {
        let dir = self
            .dirs
            .remove(name)
            .ok_or_else(|| SkfsError::DirNotFound { dir: name.clone() })?;
        if let Dir::Deleted(tomb) = dir {
            self.dirs.insert(name.clone(), Dir::Deleted(tomb));
            return Ok(());
        }
        let time = self.bump();
        let mut readers = BTreeSet::new();
        match &dir {
            Dir::Eager(eager) => {
                for entry in eager.entries().values() {
                    readers.extend(entry.readers().iter().cloned());
                }
            }
            Dir::Lazy(lazy) => {
                for entry in lazy.cache.values() {
                    readers.extend(entry.readers.iter().cloned());
                }
            }
            Dir::Deleted(_) => unreachable!(),
        }
        self.dirty_readers.extend(readers);
        self.dirs.insert(
            name.clone(),
            Dir::Deleted(DeletedDir {
                name: name.clone(),
                time,
            }),
        );
        debug!(dir = %name, "removed directory");
        Ok(())
    }

    /// Register a lazy directory's compute function
    ///
    /// Creates the directory, or re-attaches the function to loaded data.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateDir` when the name is occupied by a live directory
    /// of another shape.
    pub(crate) fn register_lazy(&mut self, name: &DirName, compute: LazyFn) -> SkfsResult<()> {
        match self.dirs.get_mut(name) {
            None => {}
            Some(Dir::Deleted(_)) => {
                self.dirs.remove(name);
            }
            Some(Dir::Lazy(dir)) if self.session == SessionKind::Loaded => {
                dir.compute = Some(compute);
                return Ok(());
            }
            Some(_) => return Err(SkfsError::DuplicateDir { dir: name.clone() }),
        }
        self.dirs
            .insert(name.clone(), Dir::Lazy(LazyDir::new(name.clone(), compute)));
        debug!(dir = %name, "created lazy directory");
        Ok(())
    }

    /// Register a derived directory and its mapper
    pub(crate) fn register_mapper(
        &mut self,
        src: &DirName,
        out: &DirName,
        func: MapperFn,
        reducer: Option<Arc<dyn Reducer>>,
    ) -> SkfsResult<()> {
        self.unsafe_get_eager_dir(src)?;
        let rehydrate = self.session == SessionKind::Loaded
            && matches!(self.dirs.get(out), Some(Dir::Eager(_)));
        if rehydrate {
            let dir = eager_mut(&mut self.dirs, out)?;
            dir.mapper = Some(MapperSpec {
                src: src.clone(),
                func: Some(func),
            });
            if let Some(reducer) = reducer {
                let aggregate = dir
                    .reducer
                    .as_ref()
                    .map(|s| s.aggregate().to_vec())
                    .unwrap_or_default();
                dir.reducer = Some(ReducerState::new(reducer, aggregate));
            }
        } else {
            match self.dirs.get(out) {
                None => {}
                Some(Dir::Deleted(_)) => {
                    self.dirs.remove(out);
                }
                Some(_) => return Err(SkfsError::DuplicateDir { dir: out.clone() }),
            }
            let mut dir = EagerDir::new(out.clone(), false);
            dir.mapper = Some(MapperSpec {
                src: src.clone(),
                func: Some(func),
            });
            if let Some(reducer) = reducer {
                let aggregate = reducer.init(&mut self.interner, &[]);
                dir.reducer = Some(ReducerState::new(reducer, aggregate));
            }
            self.dirs.insert(out.clone(), Dir::Eager(dir));
        }
        eager_mut(&mut self.dirs, src)?.add_derived(out.clone());
        debug!(src = %src, out = %out, rehydrate, "registered mapper");

        if !rehydrate {
            for key in self.unsafe_get_eager_dir(src)?.keys() {
                let path = Path::new(out.clone(), key);
                if let Err(err) = self.rerun_mapper(&path) {
                    if err.is_retryable() {
                        warn!(path = %path, error = %err, "initial mapper run failed");
                        self.dirty_readers.insert(path);
                    } else {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read a cell, recording a dependency for the active reader frame
    ///
    /// Eager cells read their materialised value; lazy cells are forced;
    /// deleted directories answer empty.
    ///
    /// # Errors
    ///
    /// Returns `DirNotFound` for unknown names.
    pub fn read_array(&mut self, dir: &DirName, key: &BaseName) -> SkfsResult<Vec<File>> {
        enum Kind {
            Eager(Vec<File>, Tick),
            Lazy,
            Deleted,
        }
        let kind = match self.dirs.get(dir) {
            None => return Err(SkfsError::DirNotFound { dir: dir.clone() }),
            Some(Dir::Deleted(_)) => Kind::Deleted,
            Some(Dir::Eager(eager)) => Kind::Eager(eager.get_array_raw(key), eager.write_time_of(key)),
            Some(Dir::Lazy(_)) => Kind::Lazy,
        };
        match kind {
            Kind::Deleted => Ok(Vec::new()),
            Kind::Lazy => self.force(dir, key),
            Kind::Eager(values, at) => {
                if let Some(reader) = self.tracker.current_reader().cloned() {
                    self.tracker.record(Path::new(dir.clone(), key.clone()), at);
                    eager_mut(&mut self.dirs, dir)?.register_reader(key, reader);
                }
                Ok(values)
            }
        }
    }

    /// Read a cell without recording a dependency
    ///
    /// Lazy cells answer their cache (or empty) without forcing.
    ///
    /// # Errors
    ///
    /// Returns `DirNotFound` for unknown names.
    pub fn read_array_raw(&self, dir: &DirName, key: &BaseName) -> SkfsResult<Vec<File>> {
        match self.dirs.get(dir) {
            None => Err(SkfsError::DirNotFound { dir: dir.clone() }),
            Some(Dir::Deleted(_)) => Ok(Vec::new()),
            Some(Dir::Eager(eager)) => Ok(eager.get_array_raw(key)),
            Some(Dir::Lazy(lazy)) => Ok(lazy
                .cache
                .get(key)
                .filter(|e| e.has_value)
                .map(|e| e.values.clone())
                .unwrap_or_default()),
        }
    }

    /// Cached value of a cell, never forcing
    ///
    /// `None` when a lazy cell has not been computed yet.
    ///
    /// # Errors
    ///
    /// Returns `DirNotFound` for unknown names.
    pub fn maybe_get(&self, dir: &DirName, key: &BaseName) -> SkfsResult<Option<Vec<File>>> {
        match self.dirs.get(dir) {
            None => Err(SkfsError::DirNotFound { dir: dir.clone() }),
            Some(Dir::Deleted(_)) => Ok(Some(Vec::new())),
            Some(Dir::Eager(eager)) => Ok(Some(eager.get_array_raw(key))),
            Some(Dir::Lazy(lazy)) => Ok(lazy
                .cache
                .get(key)
                .filter(|e| e.has_value)
                .map(|e| e.values.clone())),
        }
    }

    /// Reducer aggregate of an eager directory, if one is attached
    ///
    /// # Errors
    ///
    /// Returns `DirNotFound` or `DirTypeMismatch`.
    pub fn aggregate(&self, dir: &DirName) -> SkfsResult<Option<Vec<File>>> {
        Ok(self
            .unsafe_get_eager_dir(dir)?
            .aggregate()
            .map(<[File]>::to_vec))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Replace the entry for `key`, dirtying its readers
    ///
    /// Identity-equal rewrites are suppressed and dirty nobody.
    ///
    /// # Errors
    ///
    /// Returns `DirNotFound`, `DirTypeMismatch`, or `WriteToDeletedDir`.
    pub fn write_array(
        &mut self,
        dir: &DirName,
        key: BaseName,
        values: Vec<File>,
    ) -> SkfsResult<()> {
        self.apply_batch(dir, vec![(key, None, Some(values))])
    }

    /// Replace one producer's slice of the entry for `key`
    ///
    /// # Errors
    ///
    /// Same as [`Context::write_array`].
    pub fn write_entry(
        &mut self,
        producer: Path,
        dir: &DirName,
        key: BaseName,
        values: Vec<File>,
    ) -> SkfsResult<()> {
        self.apply_batch(dir, vec![(key, Some(producer), Some(values))])
    }

    /// Remove the entry for `key`; a no-op when absent
    ///
    /// # Errors
    ///
    /// Same as [`Context::write_array`].
    pub fn remove(&mut self, dir: &DirName, key: BaseName) -> SkfsResult<()> {
        self.apply_batch(dir, vec![(key, None, None)])
    }

    /// Stream several entries as one batch
    ///
    /// The whole batch shares one tick and produces a single aggregated
    /// reducer delta.
    ///
    /// # Errors
    ///
    /// Same as [`Context::write_array`].
    pub fn write_array_many(
        &mut self,
        dir: &DirName,
        entries: impl IntoIterator<Item = (BaseName, Vec<File>)>,
    ) -> SkfsResult<()> {
        let ops: Vec<BatchOp> = entries
            .into_iter()
            .map(|(k, v)| (k, None, Some(v)))
            .collect();
        self.apply_batch(dir, ops)
    }

    /// Apply one write batch at one tick
    pub(crate) fn apply_batch(&mut self, dir_name: &DirName, ops: Vec<BatchOp>) -> SkfsResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let tick = self.time.next();
        let mut dirtied = BTreeSet::new();
        let mut removed_delta = Vec::new();
        let mut added_delta = Vec::new();
        let mut changed_keys: BTreeSet<BaseName> = BTreeSet::new();
        let derived;
        {
            let dir = match self.dirs.get_mut(dir_name) {
                None => return Err(SkfsError::DirNotFound { dir: dir_name.clone() }),
                Some(Dir::Deleted(_)) => {
                    return Err(SkfsError::WriteToDeletedDir { dir: dir_name.clone() })
                }
                Some(Dir::Lazy(_)) => {
                    return Err(SkfsError::DirTypeMismatch {
                        dir: dir_name.clone(),
                        expected: "eager",
                        actual: "lazy",
                    })
                }
                Some(Dir::Eager(dir)) => dir,
            };
            for (key, producer, values) in ops {
                let outcome = dir.apply(&key, producer.as_ref(), values, tick);
                if outcome.changed {
                    changed_keys.insert(key);
                    dirtied.extend(outcome.readers);
                    removed_delta.extend(outcome.removed);
                    added_delta.extend(outcome.added);
                }
            }
            derived = dir.derived().to_vec();
        }
        if changed_keys.is_empty() {
            return Ok(());
        }
        self.time = tick;
        self.stats.writes += changed_keys.len() as u64;

        // One aggregated reducer delta per batch.
        if let Some(Dir::Eager(dir)) = self.dirs.get_mut(dir_name) {
            let attached = dir
                .reducer
                .as_ref()
                .and_then(|state| state.reducer.clone().map(|r| (r, state.aggregate().to_vec())));
            if let Some((reducer, current)) = attached {
                let next = match reducer.update(
                    &mut self.interner,
                    &current,
                    &removed_delta,
                    &added_delta,
                ) {
                    Some(next) => next,
                    None => {
                        let all = dir.all_values();
                        reducer.init(&mut self.interner, &all)
                    }
                };
                if let Some(state) = dir.reducer.as_mut() {
                    state.aggregate = next;
                }
            }
        }

        for out in derived {
            for key in &changed_keys {
                dirtied.insert(Path::new(out.clone(), key.clone()));
            }
        }
        self.dirty_readers.extend(dirtied);
        self.changed
            .entry(dir_name.clone())
            .or_default()
            .extend(changed_keys);
        Ok(())
    }

    // =========================================================================
    // Lazy forcing
    // =========================================================================

    /// Force a lazy cell, memoising the result
    ///
    /// Serves a valid cache without recomputation. Re-entry into a cell that
    /// is already computing returns its stale value (or empty) instead of
    /// recursing; the graph is driven to a fixed point by later updates.
    /// A failed computation keeps the stale value, leaves the cell dirty for
    /// retry, and still returns the stale value.
    ///
    /// # Errors
    ///
    /// Returns `DirNotFound` or `DirTypeMismatch` for the directory itself.
    pub fn force(&mut self, dir_name: &DirName, key: &BaseName) -> SkfsResult<Vec<File>> {
        enum Decision {
            Hit(Vec<File>, Tick),
            Stale(Vec<File>, Tick),
            Recompute,
        }
        let path = Path::new(dir_name.clone(), key.clone());
        let decision = match self.dirs.get(dir_name) {
            None => return Err(SkfsError::DirNotFound { dir: dir_name.clone() }),
            Some(Dir::Deleted(_)) => return Ok(Vec::new()),
            Some(Dir::Eager(_)) => {
                return Err(SkfsError::DirTypeMismatch {
                    dir: dir_name.clone(),
                    expected: "lazy",
                    actual: "eager",
                })
            }
            Some(Dir::Lazy(lazy)) => match lazy.cache.get(key) {
                Some(e) if e.state == LazyState::InFlight => {
                    Decision::Stale(e.values.clone(), e.computed_at)
                }
                Some(e)
                    if e.state == LazyState::Clean
                        && e.has_value
                        && !self.dirty_readers.contains(&path)
                        && e.deps
                            .iter()
                            .all(|(p, t)| current_write_time(&self.dirs, p) == *t) =>
                {
                    Decision::Hit(e.values.clone(), e.computed_at)
                }
                _ => Decision::Recompute,
            },
        };

        match decision {
            Decision::Hit(values, at) => {
                self.stats.cache_hits += 1;
                self.note_lazy_read(dir_name, key, at);
                Ok(values)
            }
            Decision::Stale(values, at) => {
                self.stats.cycles_tolerated += 1;
                warn!(path = %path, "cycle through in-flight cell; returning stale value");
                self.note_lazy_read(dir_name, key, at);
                Ok(values)
            }
            Decision::Recompute => self.recompute_lazy(path),
        }
    }

    fn recompute_lazy(&mut self, path: Path) -> SkfsResult<Vec<File>> {
        let compute = {
            let lazy = lazy_mut(&mut self.dirs, &path.dir)?;
            let entry = lazy
                .cache
                .entry(path.key.clone())
                .or_insert_with(LazyEntry::new);
            entry.state = LazyState::InFlight;
            lazy.compute.clone()
        };
        let Some(compute) = compute else {
            // Loaded data whose code was never re-attached.
            let lazy = lazy_mut(&mut self.dirs, &path.dir)?;
            if let Some(entry) = lazy.cache.get_mut(&path.key) {
                entry.state = LazyState::Dirty;
            }
            self.stats.compute_failures += 1;
            warn!(path = %path, "no compute function attached");
            return Ok(Vec::new());
        };

        self.dirty_readers.remove(&path);
        self.tracker.push(path.clone());
        let result = compute(self, &path.dir, &path.key);
        let frame = self.tracker.pop().expect("frame pushed above");

        match result {
            Ok(values) => {
                let values: Vec<File> = values
                    .into_iter()
                    .map(|f| self.interner.intern_file(f))
                    .collect();
                let computed_at = self.bump();
                let changed;
                let to_dirty;
                {
                    let lazy = lazy_mut(&mut self.dirs, &path.dir)?;
                    let entry = lazy
                        .cache
                        .get_mut(&path.key)
                        .expect("entry created before compute");
                    changed = !(entry.has_value && same_values(&entry.values, &values));
                    entry.values = values.clone();
                    entry.has_value = true;
                    entry.deps = frame.deps;
                    entry.computed_at = computed_at;
                    entry.state = LazyState::Clean;
                    to_dirty = if changed {
                        std::mem::take(&mut entry.readers)
                    } else {
                        BTreeSet::new()
                    };
                }
                self.stats.recomputes += 1;
                if changed {
                    self.dirty_readers.extend(to_dirty);
                    self.changed
                        .entry(path.dir.clone())
                        .or_default()
                        .insert(path.key.clone());
                }
                self.note_lazy_read(&path.dir, &path.key, computed_at);
                Ok(values)
            }
            Err(err) => {
                let stale = {
                    let lazy = lazy_mut(&mut self.dirs, &path.dir)?;
                    let entry = lazy
                        .cache
                        .get_mut(&path.key)
                        .expect("entry created before compute");
                    entry.state = LazyState::Dirty;
                    entry.values.clone()
                };
                self.stats.compute_failures += 1;
                warn!(path = %path, error = %err, "lazy compute failed; keeping stale value");
                self.dirty_readers.insert(path);
                Ok(stale)
            }
        }
    }

    /// Record a read of a lazy cell for the active frame
    fn note_lazy_read(&mut self, dir_name: &DirName, key: &BaseName, at: Tick) {
        if let Some(reader) = self.tracker.current_reader().cloned() {
            self.tracker.record(Path::new(dir_name.clone(), key.clone()), at);
            if let Ok(lazy) = lazy_mut(&mut self.dirs, dir_name) {
                lazy.cache
                    .entry(key.clone())
                    .or_insert_with(LazyEntry::new)
                    .readers
                    .insert(reader);
            }
        }
    }

    // =========================================================================
    // Update - invalidation drain
    // =========================================================================

    /// Tick, then recompute the smallest sufficient set of dirty readers
    ///
    /// Dirty paths drain in ascending order, which makes recomputation
    /// deterministic. Eager producer paths re-run their mapper for the one
    /// source key; lazy paths recompute in place when they hold a value.
    /// Per-entry failures keep the stale value and stay dirty for the next
    /// update. Returns the recomputed paths.
    ///
    /// # Errors
    ///
    /// Only fatal engine errors propagate; compute failures are captured.
    pub fn update(&mut self) -> SkfsResult<Vec<Path>> {
        self.bump();
        let mut recomputed = Vec::new();
        let mut deferred: BTreeSet<Path> = BTreeSet::new();
        let mut lazy_done: BTreeSet<Path> = BTreeSet::new();

        while let Some(path) = self.dirty_readers.pop_first() {
            enum Producer {
                Mapper,
                Lazy,
                None,
            }
            let producer = match self.dirs.get(&path.dir) {
                Some(Dir::Eager(dir)) if dir.mapper.is_some() => Producer::Mapper,
                Some(Dir::Lazy(_)) => Producer::Lazy,
                // Input dirs without a mapper and dropped dirs have no
                // producer to run.
                _ => Producer::None,
            };
            match producer {
                Producer::Mapper => match self.rerun_mapper(&path) {
                    Ok(()) => recomputed.push(path),
                    Err(err) if err.is_retryable() => {
                        warn!(path = %path, error = %err, "mapper failed; will retry");
                        deferred.insert(path);
                    }
                    Err(err) => return Err(err),
                },
                Producer::Lazy => {
                    if lazy_done.contains(&path) {
                        // Recomputed once this drain already; the stale value
                        // is tolerated until the next update.
                        deferred.insert(path);
                        continue;
                    }
                    lazy_done.insert(path.clone());
                    if self.refresh_lazy(&path)? {
                        recomputed.push(path);
                    }
                }
                Producer::None => {}
            }
        }

        self.dirty_readers.extend(deferred);
        self.flush_changes();
        debug!(
            tick = %self.time,
            recomputed = recomputed.len(),
            pending = self.dirty_readers.len(),
            "update complete"
        );
        Ok(recomputed)
    }

    /// Re-run the mapper behind `reader` (an output dir plus a source key)
    ///
    /// Reads the source entry under a fresh frame, runs the mapper, then
    /// applies the run's writes as one batch, withdrawing output keys the
    /// producer no longer writes.
    pub(crate) fn rerun_mapper(&mut self, reader: &Path) -> SkfsResult<()> {
        let (src_name, func) = {
            let out = match self.dirs.get(&reader.dir) {
                Some(Dir::Eager(dir)) => dir,
                _ => return Ok(()),
            };
            let Some(spec) = &out.mapper else {
                return Ok(());
            };
            let func = spec
                .func
                .clone()
                .ok_or_else(|| SkfsError::compute(reader.clone(), "mapper code not attached"))?;
            (spec.src.clone(), func)
        };

        self.tracker.push(reader.clone());
        let result = self
            .read_array(&src_name, &reader.key)
            .and_then(|src_values| {
                let mut writer = Writer::new(reader.clone());
                func(self, &mut writer, &reader.key, &src_values).map(|()| writer)
            });
        self.tracker.pop();

        match result {
            Ok(writer) => {
                let writes = writer.into_writes();
                let new_keys: BTreeSet<BaseName> = writes.keys().cloned().collect();
                let old_keys = {
                    match self.dirs.get(&reader.dir) {
                        Some(Dir::Eager(dir)) => dir.producer_keys(reader),
                        _ => BTreeSet::new(),
                    }
                };
                let mut ops: Vec<BatchOp> = writes
                    .into_iter()
                    .map(|(key, values)| (key, Some(reader.clone()), Some(values)))
                    .collect();
                for stale in old_keys.difference(&new_keys) {
                    ops.push((stale.clone(), Some(reader.clone()), None));
                }
                self.apply_batch(&reader.dir, ops)?;
                self.stats.recomputes += 1;
                Ok(())
            }
            Err(err) => {
                self.stats.compute_failures += 1;
                Err(SkfsError::compute(reader.clone(), err.to_string()))
            }
        }
    }

    /// Recompute a dirtied lazy cell in place when it holds a value
    fn refresh_lazy(&mut self, path: &Path) -> SkfsResult<bool> {
        let has_value = match self.dirs.get(&path.dir) {
            Some(Dir::Lazy(lazy)) => lazy
                .cache
                .get(&path.key)
                .map(|e| e.has_value && e.state != LazyState::InFlight)
                .unwrap_or(false),
            _ => return Ok(false),
        };
        if let Ok(lazy) = lazy_mut(&mut self.dirs, &path.dir) {
            if let Some(entry) = lazy.cache.get_mut(&path.key) {
                if entry.state != LazyState::InFlight {
                    entry.state = LazyState::Dirty;
                }
            }
        }
        if has_value {
            self.force(&path.dir, &path.key)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn flush_changes(&mut self) {
        if self.changed.is_empty() {
            return;
        }
        let changed = std::mem::take(&mut self.changed);
        self.subs.publish(&changed, self.time);
    }

    // =========================================================================
    // Globals
    // =========================================================================

    /// Store a session-scoped named value
    pub fn set_global(&mut self, name: impl Into<String>, value: File) {
        self.globals.insert(name.into(), value);
    }

    /// Read a session-scoped named value
    pub fn get_global(&self, name: &str) -> Option<File> {
        self.globals.get(name).cloned()
    }

    /// Drop a session-scoped named value
    pub fn remove_global(&mut self, name: &str) -> Option<File> {
        self.globals.remove(name)
    }

    // =========================================================================
    // External pointers
    // =========================================================================

    /// Register an external resource, returning its handle
    pub fn register_external(&mut self, value: u64, finalizer: Option<Finalizer>) -> ExternalId {
        self.externals.register(value, finalizer)
    }

    /// Register an external resource and intern a `File` naming it
    pub fn external_file(&mut self, value: u64, finalizer: Option<Finalizer>) -> File {
        let id = self.externals.register(value, finalizer);
        self.intern(FileData::External(id))
    }

    /// The external pointer registry
    pub fn externals(&self) -> &ExternalRegistry {
        &self.externals
    }

    /// Mutable access to the external pointer registry
    pub fn externals_mut(&mut self) -> &mut ExternalRegistry {
        &mut self.externals
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Watch a directory for per-update change batches
    pub fn subscribe(&mut self, dir: DirName) -> SubId {
        self.subs.subscribe(dir)
    }

    /// Take the queued change batches of a subscription
    pub fn drain_events(&mut self, id: SubId) -> Vec<ChangeEvent> {
        self.subs.drain(id)
    }

    /// Stop watching
    pub fn unsubscribe(&mut self, id: SubId) {
        self.subs.unsubscribe(id);
    }

    // =========================================================================
    // Nested scopes
    // =========================================================================

    /// Shallow mutable fork for a nested scope
    ///
    /// Directory contents share their allocations with the parent; writes in
    /// the child flow back wholesale through [`Context::commit`].
    pub fn mclone(&self) -> Context {
        Context {
            time: self.time,
            dirs: self.dirs.clone(),
            dirty_readers: self.dirty_readers.clone(),
            globals: self.globals.clone(),
            interner: self.interner.clone(),
            externals: self.externals.clone(),
            subs: self.subs.clone(),
            stats: self.stats,
            session: self.session,
            changed: self.changed.clone(),
            tracker: Tracker::default(),
        }
    }

    /// Replace this context with a forked child's state
    pub fn commit(&mut self, child: Context) {
        *self = child;
    }
}
