//! Per-key mappers
//!
//! A mapper derives an output directory from a source directory: it re-runs
//! for every source key whose entry changed, writing output entries through a
//! [`Writer`]. Each write is tagged with the mapper's producer path (the
//! output directory plus the source key), so several source keys can
//! contribute disjoint slices to one output entry and a re-run replaces only
//! its own contribution.

use crate::context::Context;
use crate::handle::EHandle;
use crate::reduce::Reducer;
use skfs_core::{BaseName, DirName, File, FileDecode, Path, SkfsResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Mapper function: `(ctx, writer, source key, source values)`
///
/// Reads performed through dependency-recording accessors while the mapper
/// runs become dependencies of the producer path; the supplied source values
/// are already covered.
pub type MapperFn =
    Arc<dyn Fn(&mut Context, &mut Writer, &BaseName, &[File]) -> SkfsResult<()> + Send + Sync>;

/// Registration of the mapper producing a derived directory
#[derive(Clone)]
pub(crate) struct MapperSpec {
    /// Source directory the mapper consumes
    pub src: DirName,
    /// Code is not persisted; `None` after a snapshot load until re-attached
    pub func: Option<MapperFn>,
}

/// Buffered writes of one mapper run
///
/// All writes land in one batch under the run's producer path when the run
/// completes; a failed run writes nothing.
pub struct Writer {
    producer: Path,
    writes: BTreeMap<BaseName, Vec<File>>,
}

impl Writer {
    pub(crate) fn new(producer: Path) -> Self {
        Writer {
            producer,
            writes: BTreeMap::new(),
        }
    }

    /// The producer path writes are tagged with
    pub fn producer(&self) -> &Path {
        &self.producer
    }

    /// Replace the run's output for `key`
    pub fn write_array(&mut self, key: BaseName, values: Vec<File>) {
        self.writes.insert(key, values);
    }

    /// Append one value to the run's output for `key`
    pub fn push(&mut self, key: BaseName, value: File) {
        self.writes.entry(key).or_default().push(value);
    }

    pub(crate) fn into_writes(self) -> BTreeMap<BaseName, Vec<File>> {
        self.writes
    }
}

/// Derive `out` from `src` through a per-key mapper
///
/// Creates `out` (or re-attaches to it after a snapshot load), registers it
/// as derived from `src`, and runs the mapper over the source's current keys.
/// An optional [`Reducer`] maintains an aggregate over the output entries.
///
/// # Errors
///
/// Fails when `out` collides with a live directory of another shape, or when
/// the initial mapper runs fail fatally.
pub fn map_key_values<S: FileDecode, T: FileDecode>(
    ctx: &mut Context,
    src: &EHandle<S>,
    out: &DirName,
    func: MapperFn,
    reducer: Option<Arc<dyn Reducer>>,
) -> SkfsResult<EHandle<T>> {
    ctx.register_mapper(src.name(), out, func, reducer)?;
    Ok(EHandle::new(out.clone()))
}
