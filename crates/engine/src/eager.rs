//! Eager directories
//!
//! An eager directory materialises its entries. Each entry is the merge of
//! one or more *slices*: the direct-write slice (inputs) and one slice per
//! producer path (mapper outputs). Readers see the concatenation of the
//! slices in canonical order — direct slice first, then producer paths
//! ascending — so downstream consumers observe a stable sequence no matter
//! which producer wrote last.
//!
//! Entries carry the bookkeeping invalidation needs: the write time, the
//! producers that contributed (with their last write tick), and the set of
//! reader paths registered by dependency-recording reads. Removal leaves a
//! tombstone entry so readers of the absent key are still dirtied by a later
//! rebirth.

use crate::mapper::MapperSpec;
use crate::reduce::ReducerState;
use skfs_core::{BaseName, DirName, File, Path, Tick};
use std::collections::{BTreeMap, BTreeSet};

/// Element-wise identity comparison of two value arrays
pub(crate) fn same_values(a: &[File], b: &[File]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same(y))
}

// =============================================================================
// Entry
// =============================================================================

/// One materialised cell of an eager directory
#[derive(Clone, Default)]
pub struct Entry {
    /// Contributions keyed by producer; `None` is the direct-write slice
    slices: BTreeMap<Option<Path>, Vec<File>>,
    /// Producer paths with the tick of their last contribution
    producers: BTreeMap<Path, Tick>,
    /// Tick of the last change to this entry
    write_time: Tick,
    /// True when the entry has been removed (or never written)
    tombstone: bool,
    /// Reader paths registered by dependency-recording reads
    readers: BTreeSet<Path>,
}

impl Entry {
    /// A tombstone placeholder used to hold readers of an absent key
    fn missing() -> Self {
        Entry {
            tombstone: true,
            ..Entry::default()
        }
    }

    /// The visible value array: slices concatenated in canonical order
    pub fn values(&self) -> Vec<File> {
        if self.tombstone {
            return Vec::new();
        }
        self.slices.values().flatten().cloned().collect()
    }

    /// Tick of the last change
    pub fn write_time(&self) -> Tick {
        self.write_time
    }

    /// True when the entry is a tombstone
    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }

    /// Producers and the tick of their last contribution
    pub fn producers(&self) -> &BTreeMap<Path, Tick> {
        &self.producers
    }

    /// Registered reader paths
    pub fn readers(&self) -> &BTreeSet<Path> {
        &self.readers
    }

    pub(crate) fn from_parts(
        slices: BTreeMap<Option<Path>, Vec<File>>,
        producers: BTreeMap<Path, Tick>,
        write_time: Tick,
        tombstone: bool,
        readers: BTreeSet<Path>,
    ) -> Self {
        Entry {
            slices,
            producers,
            write_time,
            tombstone,
            readers,
        }
    }

    pub(crate) fn slices(&self) -> &BTreeMap<Option<Path>, Vec<File>> {
        &self.slices
    }

    pub(crate) fn readers_mut(&mut self) -> &mut BTreeSet<Path> {
        &mut self.readers
    }

    /// Replace every value through `f`; the collector re-interns with this
    pub(crate) fn remap_values(&mut self, f: &mut dyn FnMut(File) -> File) {
        for values in self.slices.values_mut() {
            for value in values.iter_mut() {
                *value = f(value.clone());
            }
        }
    }
}

/// Result of applying one write operation to an entry
pub(crate) struct WriteOutcome {
    /// False when the write was suppressed as an identity no-op
    pub changed: bool,
    /// Values no longer visible after the write
    pub removed: Vec<File>,
    /// Values newly visible after the write
    pub added: Vec<File>,
    /// Readers to dirty; cleared from the entry, they re-register on re-read
    pub readers: BTreeSet<Path>,
}

impl WriteOutcome {
    fn unchanged() -> Self {
        WriteOutcome {
            changed: false,
            removed: Vec::new(),
            added: Vec::new(),
            readers: BTreeSet::new(),
        }
    }
}

// =============================================================================
// EagerDir
// =============================================================================

/// A directory whose contents are materialised by writes
#[derive(Clone)]
pub struct EagerDir {
    name: DirName,
    is_input: bool,
    entries: BTreeMap<BaseName, Entry>,
    /// Output directories derived from this one; their mapper re-runs on
    /// every changed key here
    derived: Vec<DirName>,
    /// Mapper producing this directory, when it is derived
    pub(crate) mapper: Option<MapperSpec>,
    /// Incremental fold over this directory's entries
    pub(crate) reducer: Option<ReducerState>,
    /// Keys each producer currently contributes to, for re-run diffing
    by_producer: BTreeMap<Path, BTreeSet<BaseName>>,
}

impl EagerDir {
    /// Create an empty directory
    pub fn new(name: DirName, is_input: bool) -> Self {
        EagerDir {
            name,
            is_input,
            entries: BTreeMap::new(),
            derived: Vec::new(),
            mapper: None,
            reducer: None,
            by_producer: BTreeMap::new(),
        }
    }

    /// The directory name
    pub fn name(&self) -> &DirName {
        &self.name
    }

    /// True for directories fed by external input writes
    pub fn is_input(&self) -> bool {
        self.is_input
    }

    /// Ordered live keys (tombstones excluded)
    pub fn keys(&self) -> Vec<BaseName> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.tombstone)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Read without recording a dependency
    ///
    /// Missing keys and tombstones read as empty. Mappers that already depend
    /// on their input holistically use this.
    pub fn get_array_raw(&self, key: &BaseName) -> Vec<File> {
        self.entries.get(key).map(Entry::values).unwrap_or_default()
    }

    /// The entry for a key, tombstones included
    pub fn entry(&self, key: &BaseName) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Write time of a key; `Tick::ZERO` for never-written keys
    pub fn write_time_of(&self, key: &BaseName) -> Tick {
        self.entries
            .get(key)
            .map(|e| e.write_time)
            .unwrap_or(Tick::ZERO)
    }

    /// Current reducer aggregate, if a reducer is attached
    pub fn aggregate(&self) -> Option<&[File]> {
        self.reducer.as_ref().map(|r| r.aggregate.as_slice())
    }

    /// All visible values across all entries, in key order
    pub fn all_values(&self) -> Vec<File> {
        self.entries.values().flat_map(Entry::values).collect()
    }

    /// Directories derived from this one
    pub fn derived(&self) -> &[DirName] {
        &self.derived
    }

    pub(crate) fn add_derived(&mut self, out: DirName) {
        if !self.derived.contains(&out) {
            self.derived.push(out);
        }
    }

    pub(crate) fn set_derived(&mut self, derived: Vec<DirName>) {
        self.derived = derived;
    }

    /// Register a reader of `key`, creating a tombstone placeholder when the
    /// key is absent so a later write still dirties the reader.
    pub(crate) fn register_reader(&mut self, key: &BaseName, reader: Path) {
        self.entries
            .entry(key.clone())
            .or_insert_with(Entry::missing)
            .readers
            .insert(reader);
    }

    /// Keys a producer currently contributes to
    pub(crate) fn producer_keys(&self, producer: &Path) -> BTreeSet<BaseName> {
        self.by_producer.get(producer).cloned().unwrap_or_default()
    }

    pub(crate) fn entries(&self) -> &BTreeMap<BaseName, Entry> {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut BTreeMap<BaseName, Entry> {
        &mut self.entries
    }

    pub(crate) fn insert_entry(&mut self, key: BaseName, entry: Entry) {
        for producer in entry.producers.keys() {
            self.by_producer
                .entry(producer.clone())
                .or_default()
                .insert(key.clone());
        }
        self.entries.insert(key, entry);
    }

    /// Apply one write operation at `tick`
    ///
    /// `producer == None` addresses the whole entry (direct write / remove);
    /// `producer == Some(p)` addresses only `p`'s slice. `values == None`
    /// removes the addressed slice or entry.
    pub(crate) fn apply(
        &mut self,
        key: &BaseName,
        producer: Option<&Path>,
        values: Option<Vec<File>>,
        tick: Tick,
    ) -> WriteOutcome {
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(Entry::missing);

        match (producer, values) {
            // Direct write: replaces the whole entry.
            (None, Some(values)) => {
                let old = entry.values();
                if !entry.tombstone && same_values(&old, &values) {
                    return WriteOutcome::unchanged();
                }
                for producer in entry.producers.keys() {
                    if let Some(keys) = self.by_producer.get_mut(producer) {
                        keys.remove(key);
                    }
                }
                entry.slices.clear();
                entry.producers.clear();
                entry.slices.insert(None, values.clone());
                entry.tombstone = false;
                entry.write_time = tick;
                WriteOutcome {
                    changed: true,
                    removed: old,
                    added: values,
                    readers: std::mem::take(&mut entry.readers),
                }
            }

            // Producer write: replaces one slice.
            (Some(producer), Some(values)) => {
                let slot = Some(producer.clone());
                let old = entry.slices.get(&slot);
                if !entry.tombstone && old.is_some_and(|old| same_values(old, &values)) {
                    return WriteOutcome::unchanged();
                }
                let removed = old.cloned().unwrap_or_default();
                entry.slices.insert(slot, values.clone());
                entry.producers.insert(producer.clone(), tick);
                entry.tombstone = false;
                entry.write_time = tick;
                self.by_producer
                    .entry(producer.clone())
                    .or_default()
                    .insert(key.clone());
                WriteOutcome {
                    changed: true,
                    removed,
                    added: values,
                    readers: std::mem::take(&mut entry.readers),
                }
            }

            // Remove the whole entry.
            (None, None) => {
                if entry.tombstone {
                    return WriteOutcome::unchanged();
                }
                let removed = entry.values();
                for producer in entry.producers.keys() {
                    if let Some(keys) = self.by_producer.get_mut(producer) {
                        keys.remove(key);
                    }
                }
                entry.slices.clear();
                entry.producers.clear();
                entry.tombstone = true;
                entry.write_time = tick;
                WriteOutcome {
                    changed: true,
                    removed,
                    added: Vec::new(),
                    readers: std::mem::take(&mut entry.readers),
                }
            }

            // Withdraw one producer's slice.
            (Some(producer), None) => {
                let slot = Some(producer.clone());
                let Some(removed) = entry.slices.remove(&slot) else {
                    return WriteOutcome::unchanged();
                };
                entry.producers.remove(producer);
                if let Some(keys) = self.by_producer.get_mut(producer) {
                    keys.remove(key);
                }
                if entry.slices.is_empty() {
                    entry.tombstone = true;
                }
                entry.write_time = tick;
                WriteOutcome {
                    changed: true,
                    removed,
                    added: Vec::new(),
                    readers: std::mem::take(&mut entry.readers),
                }
            }
        }
    }
}
