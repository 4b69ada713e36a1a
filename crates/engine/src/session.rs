//! Session subscriptions
//!
//! A subscriber watches one directory and receives a batch of changed keys
//! per `update()`. Delivery is pull-based: events queue on the subscription
//! and the session layer drains them between driver iterations.

use skfs_core::{BaseName, DirName, Tick};
use std::collections::{BTreeMap, BTreeSet};

/// Subscription handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubId(pub u64);

/// One batch of changes to a watched directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The watched directory
    pub dir: DirName,
    /// Keys whose visible value changed
    pub keys: BTreeSet<BaseName>,
    /// Tick of the update that flushed the batch
    pub tick: Tick,
}

#[derive(Debug, Clone, Default)]
struct SubState {
    dir: Option<DirName>,
    pending: Vec<ChangeEvent>,
}

/// Subscription table owned by the context
#[derive(Debug, Clone, Default)]
pub struct Subscriptions {
    next: u64,
    subs: BTreeMap<u64, SubState>,
}

impl Subscriptions {
    /// Watch a directory
    pub fn subscribe(&mut self, dir: DirName) -> SubId {
        let id = self.next;
        self.next += 1;
        self.subs.insert(
            id,
            SubState {
                dir: Some(dir),
                pending: Vec::new(),
            },
        );
        SubId(id)
    }

    /// Stop watching
    pub fn unsubscribe(&mut self, id: SubId) {
        self.subs.remove(&id.0);
    }

    /// Queue one update's changes onto every matching subscription
    pub fn publish(&mut self, changed: &BTreeMap<DirName, BTreeSet<BaseName>>, tick: Tick) {
        for state in self.subs.values_mut() {
            let Some(dir) = &state.dir else { continue };
            if let Some(keys) = changed.get(dir) {
                if !keys.is_empty() {
                    state.pending.push(ChangeEvent {
                        dir: dir.clone(),
                        keys: keys.clone(),
                        tick,
                    });
                }
            }
        }
    }

    /// Take all queued events for a subscription
    pub fn drain(&mut self, id: SubId) -> Vec<ChangeEvent> {
        self.subs
            .get_mut(&id.0)
            .map(|s| std::mem::take(&mut s.pending))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(name: &str) -> DirName {
        DirName::new(name).unwrap()
    }

    #[test]
    fn test_publish_routes_by_dir() {
        let mut subs = Subscriptions::default();
        let a = subs.subscribe(dir("/a/"));
        let b = subs.subscribe(dir("/b/"));

        let mut changed = BTreeMap::new();
        changed.insert(dir("/a/"), BTreeSet::from([BaseName::iid(1)]));
        subs.publish(&changed, Tick::from_raw(5));

        let got = subs.drain(a);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].tick, Tick::from_raw(5));
        assert!(subs.drain(b).is_empty());
        // Draining consumes.
        assert!(subs.drain(a).is_empty());
    }
}
