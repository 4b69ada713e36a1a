//! Incremental reducers
//!
//! A reducer attached to an eager directory maintains an aggregate over all
//! of the directory's visible values. Writes feed the reducer one aggregated
//! delta per batch; `update` may decline (return `None`) and the engine falls
//! back to a full `init` scan.
//!
//! The contract: for any sequence of writes, `init` over the final values and
//! repeated `update` applications must agree. The engine is free to coalesce
//! deltas and to call `init` at any time, so both entry points must be
//! equivalent.

use skfs_core::{File, Interner};
use std::sync::Arc;

/// Incremental fold over an eager directory's entries
pub trait Reducer: Send + Sync {
    /// Whether `init` may be called with partial data during GC replay
    ///
    /// Reducers that answer `false` have their aggregate evacuated whole by
    /// the collector instead of being rebuilt.
    fn can_reset(&self) -> bool;

    /// Aggregate from a full scan of all visible values
    fn init(&self, interner: &mut Interner, values: &[File]) -> Vec<File>;

    /// Apply one batch delta to the aggregate
    ///
    /// Returning `None` signals the aggregate cannot be maintained
    /// incrementally for this delta; the engine falls back to `init`.
    fn update(
        &self,
        interner: &mut Interner,
        state: &[File],
        removed: &[File],
        added: &[File],
    ) -> Option<Vec<File>>;
}

/// A reducer with its current aggregate
///
/// Code is not persisted: a state restored from a snapshot carries only the
/// aggregate until the client re-attaches the reducer.
#[derive(Clone)]
pub struct ReducerState {
    pub(crate) reducer: Option<Arc<dyn Reducer>>,
    pub(crate) aggregate: Vec<File>,
}

impl ReducerState {
    pub(crate) fn new(reducer: Arc<dyn Reducer>, aggregate: Vec<File>) -> Self {
        ReducerState {
            reducer: Some(reducer),
            aggregate,
        }
    }

    pub(crate) fn data_only(aggregate: Vec<File>) -> Self {
        ReducerState {
            reducer: None,
            aggregate,
        }
    }

    /// The current aggregate
    pub fn aggregate(&self) -> &[File] {
        &self.aggregate
    }

    /// Whether the underlying reducer can rebuild from a scan
    ///
    /// `false` while no code is attached; the collector then evacuates the
    /// aggregate whole.
    pub fn can_reset(&self) -> bool {
        self.reducer.as_ref().is_some_and(|r| r.can_reset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skfs_core::FileData;

    /// Integer sum; the aggregate is a single `Int`.
    struct Sum;

    impl Reducer for Sum {
        fn can_reset(&self) -> bool {
            true
        }

        fn init(&self, interner: &mut Interner, values: &[File]) -> Vec<File> {
            let total: i64 = values.iter().filter_map(File::as_int).sum();
            vec![interner.intern(FileData::Int(total))]
        }

        fn update(
            &self,
            interner: &mut Interner,
            state: &[File],
            removed: &[File],
            added: &[File],
        ) -> Option<Vec<File>> {
            let current = state.first().and_then(File::as_int)?;
            let gone: i64 = removed.iter().filter_map(File::as_int).sum();
            let new: i64 = added.iter().filter_map(File::as_int).sum();
            Some(vec![interner.intern(FileData::Int(current - gone + new))])
        }
    }

    fn ints(interner: &mut Interner, values: &[i64]) -> Vec<File> {
        values.iter().map(|v| interner.intern(FileData::Int(*v))).collect()
    }

    #[test]
    fn test_init_and_update_agree() {
        let mut interner = Interner::new();
        let sum = Sum;

        let full = ints(&mut interner, &[1, 2, 3]);
        let from_init = sum.init(&mut interner, &full);

        let start_vals = ints(&mut interner, &[1]);
        let start = sum.init(&mut interner, &start_vals);
        let added = ints(&mut interner, &[2, 3]);
        let from_update = sum.update(&mut interner, &start, &[], &added).unwrap();

        assert!(from_init[0].same(&from_update[0]));
    }

    #[test]
    fn test_update_with_removal() {
        let mut interner = Interner::new();
        let sum = Sum;
        let start_vals = ints(&mut interner, &[5, 7]);
        let start = sum.init(&mut interner, &start_vals);
        let removed = ints(&mut interner, &[5]);
        let next = sum.update(&mut interner, &start, &removed, &[]).unwrap();
        assert_eq!(next[0].as_int(), Some(7));
    }
}
