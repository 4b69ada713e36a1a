//! External pointer registry
//!
//! External pointers name resources the engine does not manage. Each slot
//! holds an opaque `u64` value and an optional finaliser. The collector
//! invokes the finaliser exactly once for slots that do not survive
//! compaction; finalisers must be idempotent because equal pointers may be
//! dropped without a call.
//!
//! Finalisers are code and are not persisted; after a snapshot load the
//! embedder re-attaches them with [`ExternalRegistry::set_finalizer`].

use skfs_core::{ExternalId, SkfsError, SkfsResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

/// Finaliser invoked with the slot's value when the slot is dropped
pub type Finalizer = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Clone)]
struct Slot {
    value: u64,
    finalizer: Option<Finalizer>,
}

/// Registry of external pointer slots
#[derive(Clone, Default)]
pub struct ExternalRegistry {
    next: u64,
    slots: BTreeMap<u64, Slot>,
}

impl ExternalRegistry {
    /// Register a value, returning its handle
    pub fn register(&mut self, value: u64, finalizer: Option<Finalizer>) -> ExternalId {
        let id = self.next;
        self.next += 1;
        self.slots.insert(id, Slot { value, finalizer });
        ExternalId(id)
    }

    /// The value behind a handle
    ///
    /// # Errors
    ///
    /// Returns `ExternalPointerInvalid` for unknown handles.
    pub fn get(&self, id: ExternalId) -> SkfsResult<u64> {
        self.slots
            .get(&id.0)
            .map(|s| s.value)
            .ok_or(SkfsError::ExternalPointerInvalid { id: id.0 })
    }

    /// Attach (or replace) the finaliser of an existing slot
    ///
    /// # Errors
    ///
    /// Returns `ExternalPointerInvalid` for unknown handles.
    pub fn set_finalizer(&mut self, id: ExternalId, finalizer: Finalizer) -> SkfsResult<()> {
        let slot = self
            .slots
            .get_mut(&id.0)
            .ok_or(SkfsError::ExternalPointerInvalid { id: id.0 })?;
        slot.finalizer = Some(finalizer);
        Ok(())
    }

    /// Drop a slot now, running its finaliser
    ///
    /// # Errors
    ///
    /// Returns `ExternalPointerInvalid` for unknown handles.
    pub fn release(&mut self, id: ExternalId) -> SkfsResult<()> {
        let slot = self
            .slots
            .remove(&id.0)
            .ok_or(SkfsError::ExternalPointerInvalid { id: id.0 })?;
        if let Some(finalizer) = slot.finalizer {
            finalizer(slot.value);
        }
        Ok(())
    }

    /// Keep only `live` slots; finalise and drop the rest
    ///
    /// Returns the number of slots finalised. Each dropped slot's finaliser
    /// runs exactly once.
    pub fn retain(&mut self, live: &BTreeSet<ExternalId>) -> u64 {
        let dead: Vec<u64> = self
            .slots
            .keys()
            .filter(|id| !live.contains(&ExternalId(**id)))
            .copied()
            .collect();
        let mut finalized = 0;
        for id in dead {
            if let Some(slot) = self.slots.remove(&id) {
                if let Some(finalizer) = slot.finalizer {
                    finalizer(slot.value);
                    finalized += 1;
                }
            }
        }
        if finalized > 0 {
            info!(finalized, "finalised external pointers");
        }
        finalized
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no slots are registered
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// (id, value) pairs for persistence
    pub fn export(&self) -> Vec<(u64, u64)> {
        self.slots.iter().map(|(id, s)| (*id, s.value)).collect()
    }

    /// Rebuild from persisted (id, value) pairs; finalisers absent
    pub fn import(next: u64, slots: Vec<(u64, u64)>) -> Self {
        ExternalRegistry {
            next,
            slots: slots
                .into_iter()
                .map(|(id, value)| {
                    (
                        id,
                        Slot {
                            value,
                            finalizer: None,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Allocation counter, for persistence
    pub fn next_id(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_register_and_get() {
        let mut reg = ExternalRegistry::default();
        let id = reg.register(42, None);
        assert_eq!(reg.get(id).unwrap(), 42);
        assert!(reg.get(ExternalId(99)).is_err());
    }

    #[test]
    fn test_retain_finalises_exactly_once() {
        let calls = Arc::new(AtomicU64::new(0));
        let calls2 = Arc::clone(&calls);
        let mut reg = ExternalRegistry::default();
        let keep = reg.register(1, None);
        let drop_ = reg.register(42, Some(Arc::new(move |v| {
            assert_eq!(v, 42);
            calls2.fetch_add(1, Ordering::SeqCst);
        })));

        let live = BTreeSet::from([keep]);
        assert_eq!(reg.retain(&live), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(reg.get(drop_).is_err());
        assert_eq!(reg.get(keep).unwrap(), 1);

        // A second pass has nothing left to finalise.
        assert_eq!(reg.retain(&live), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_runs_finalizer() {
        let calls = Arc::new(AtomicU64::new(0));
        let calls2 = Arc::clone(&calls);
        let mut reg = ExternalRegistry::default();
        let id = reg.register(7, Some(Arc::new(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        })));
        reg.release(id).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(reg.release(id).is_err());
    }
}
