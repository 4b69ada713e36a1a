//! Garbage collection
//!
//! A copying-style compaction of the live graph: deleted-directory
//! tombstones are dropped, dead entry tombstones (no registered readers) are
//! dropped, every live file is evacuated into a fresh canonical interning
//! table, and external pointer slots that are no longer referenced are
//! finalised exactly once.
//!
//! Observable state is unchanged: every readable value, every memoised lazy
//! cell, every global, and every reducer aggregate survives with interning
//! identity preserved. Reducers whose code answers `can_reset` are rebuilt
//! from a full scan; the rest are evacuated whole.

use crate::context::Context;
use crate::dir::Dir;
use skfs_core::{DirName, ExternalId, File, FileData, Interner};
use std::collections::BTreeSet;
use tracing::info;

/// What one collection accomplished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Deleted-directory tombstones dropped
    pub dirs_dropped: u64,
    /// Dead entry tombstones and never-computed lazy placeholders dropped
    pub entries_dropped: u64,
    /// Canonical files in the table after evacuation
    pub files_interned: u64,
    /// External pointer slots finalised
    pub externals_finalized: u64,
}

/// Record every external id reachable from a file
fn collect_externals(file: &File, live: &mut BTreeSet<ExternalId>) {
    match file.data() {
        FileData::External(id) => {
            live.insert(*id);
        }
        FileData::Record { fields, .. } => {
            for field in fields {
                collect_externals(field, live);
            }
        }
        _ => {}
    }
}

impl Context {
    /// Compact the live graph
    ///
    /// Safe to run between driver iterations; with no pending updates the
    /// observable state is a no-op.
    pub fn collect(&mut self) -> GcReport {
        let mut report = GcReport::default();

        // Deleted-directory tombstones go first so reader pruning below sees
        // the final name set.
        let dead_dirs: Vec<DirName> = self
            .dirs
            .iter()
            .filter(|(_, dir)| matches!(dir, Dir::Deleted(_)))
            .map(|(name, _)| name.clone())
            .collect();
        report.dirs_dropped = dead_dirs.len() as u64;
        for name in dead_dirs {
            self.dirs.remove(&name);
        }
        let live_names: BTreeSet<DirName> = self.dirs.keys().cloned().collect();

        // Evacuate every live file into a fresh table and gather the external
        // ids still referenced.
        let mut table = Interner::new();
        let mut live_externals: BTreeSet<ExternalId> = BTreeSet::new();
        let mut evacuate = |file: File, table: &mut Interner| {
            let file = table.intern_file(file);
            collect_externals(&file, &mut live_externals);
            file
        };

        for dir in self.dirs.values_mut() {
            match dir {
                Dir::Eager(eager) => {
                    let before = eager.entries().len();
                    eager
                        .entries_mut()
                        .retain(|_, e| !(e.is_tombstone() && e.readers().is_empty()));
                    report.entries_dropped += (before - eager.entries().len()) as u64;

                    for entry in eager.entries_mut().values_mut() {
                        entry.remap_values(&mut |f| evacuate(f, &mut table));
                        entry.readers_mut().retain(|p| live_names.contains(&p.dir));
                    }
                    if let Some(state) = eager.reducer.as_mut() {
                        state.aggregate = state
                            .aggregate
                            .drain(..)
                            .map(|f| evacuate(f, &mut table))
                            .collect();
                    }
                }
                Dir::Lazy(lazy) => {
                    let before = lazy.cache.len();
                    lazy.cache
                        .retain(|_, e| e.has_value || !e.readers.is_empty());
                    report.entries_dropped += (before - lazy.cache.len()) as u64;

                    for entry in lazy.cache.values_mut() {
                        entry.values = entry
                            .values
                            .drain(..)
                            .map(|f| evacuate(f, &mut table))
                            .collect();
                        entry.readers.retain(|p| live_names.contains(&p.dir));
                        entry.deps.retain(|(p, _)| live_names.contains(&p.dir));
                    }
                }
                Dir::Deleted(_) => unreachable!("dropped above"),
            }
        }
        for value in self.globals.values_mut() {
            *value = evacuate(value.clone(), &mut table);
        }
        drop(evacuate);

        // Reducers that can reset are rebuilt from a full scan; both entry
        // points must agree, so the aggregate is unchanged observably.
        let resettable: Vec<DirName> = self
            .dirs
            .values()
            .filter_map(|dir| match dir {
                Dir::Eager(e) if e.reducer.as_ref().is_some_and(|r| r.can_reset()) => {
                    Some(e.name().clone())
                }
                _ => None,
            })
            .collect();
        for name in resettable {
            if let Some(Dir::Eager(eager)) = self.dirs.get_mut(&name) {
                let all = eager.all_values();
                if let Some(state) = eager.reducer.as_mut() {
                    if let Some(reducer) = state.reducer.clone() {
                        state.aggregate = reducer.init(&mut table, &all);
                    }
                }
            }
        }

        self.dirty_readers.retain(|p| live_names.contains(&p.dir));
        report.files_interned = table.len() as u64;
        report.externals_finalized = self.externals.retain(&live_externals);
        self.interner = table;

        info!(
            dirs_dropped = report.dirs_dropped,
            entries_dropped = report.entries_dropped,
            files_interned = report.files_interned,
            externals_finalized = report.externals_finalized,
            "collection complete"
        );
        report
    }
}
