use std::sync::Arc;

use parking_lot::{Mutex, RawMutex};

use super::{
    avl::{AvlMultiMap, Handle},
    time::Instant,
};

/// The expiration index: expiry timestamps to keys, ascending.
pub(crate) type ExpirationIndex<K> = AvlMultiMap<Instant, Arc<K>>;

/// The result cached for a key. `None` only while the loader that created the
/// entry is still running, or after it panicked.
pub(crate) type Slot<V, E> = Option<Result<V, Arc<E>>>;

/// A slot shared by the dict and every caller that is reading or loading it. The
/// entry lock is the slot's mutex.
pub(crate) type SharedSlot<V, E> = Arc<Mutex<Slot<V, E>>>;

/// An owned guard of a [`SharedSlot`]. It does not borrow the dict, so it can be
/// carried out of the structural section.
pub(crate) type SlotGuard<V, E> = lock_api::ArcMutexGuard<RawMutex, Slot<V, E>>;

/// The per-key record owned by the dict.
///
/// While its loader runs, an entry is not in the expiration index. Its expiry
/// is held back in `deferred` and applied by [`Entry::finish_loading`], so lazy
/// cleanup never removes an entry that is still being loaded.
pub(crate) struct Entry<K, V, E> {
    key: Arc<K>,
    slot: SharedSlot<V, E>,
    expire_at: Option<Instant>,
    handle: Option<Handle>,
    loading: bool,
    deferred: Option<Instant>,
}

impl<K, V, E> Entry<K, V, E> {
    /// Creates an entry that never expires. Use [`Entry::reschedule`] to give it
    /// an expiry.
    pub(crate) fn new(key: Arc<K>, slot: SharedSlot<V, E>) -> Self {
        Self {
            key,
            slot,
            expire_at: None,
            handle: None,
            loading: false,
            deferred: None,
        }
    }

    /// Creates an entry whose loader is about to run. It gets `expire_at` once
    /// the load has finished.
    pub(crate) fn loading(
        key: Arc<K>,
        slot: SharedSlot<V, E>,
        expire_at: Option<Instant>,
    ) -> Self {
        Self {
            loading: true,
            deferred: expire_at,
            ..Self::new(key, slot)
        }
    }

    pub(crate) fn slot(&self) -> &SharedSlot<V, E> {
        &self.slot
    }

    pub(crate) fn expire_at(&self) -> Option<Instant> {
        self.expire_at
    }

    pub(crate) fn handle(&self) -> Option<Handle> {
        self.handle
    }

    /// Sets the expiry, or defers it to the end of the running load.
    pub(crate) fn schedule(&mut self, index: &mut ExpirationIndex<K>, expire_at: Option<Instant>) {
        if self.loading {
            self.deferred = expire_at;
        } else {
            self.reschedule(index, expire_at);
        }
    }

    /// Indexes the deferred expiry after the load has finished. Returns `false`
    /// if the entry was not loading.
    pub(crate) fn finish_loading(&mut self, index: &mut ExpirationIndex<K>) -> bool {
        if !self.loading {
            return false;
        }
        self.loading = false;
        let expire_at = self.deferred.take();
        self.reschedule(index, expire_at);
        true
    }

    /// Sets the expiry and keeps the index in step with it: the entry has a
    /// handle if and only if it has an expiry.
    pub(crate) fn reschedule(
        &mut self,
        index: &mut ExpirationIndex<K>,
        expire_at: Option<Instant>,
    ) {
        self.handle = match (self.handle, expire_at) {
            (Some(h), Some(t)) => Some(
                index
                    .update_key(h, t)
                    .unwrap_or_else(|| index.insert(t, Arc::clone(&self.key))),
            ),
            (Some(h), None) => {
                index.remove(h);
                None
            }
            (None, Some(t)) => Some(index.insert(t, Arc::clone(&self.key))),
            (None, None) => None,
        };
        self.expire_at = expire_at;
    }
}

#[cfg(test)]
mod tests {
    use super::{Entry, ExpirationIndex};
    use crate::Clock;

    use parking_lot::Mutex;
    use std::{sync::Arc, time::Duration};

    #[test]
    fn reschedule_keeps_the_index_in_step() {
        let (clock, _fake) = Clock::fake();
        let t0 = clock.now();
        let t1 = t0.saturating_add(Duration::from_secs(1));
        let t2 = t0.saturating_add(Duration::from_secs(2));

        let mut index = ExpirationIndex::new();
        let mut entry = Entry::<&str, u32, ()>::new(Arc::new("a"), Arc::new(Mutex::new(None)));
        assert_eq!(entry.handle(), None);

        // never -> t1
        entry.reschedule(&mut index, Some(t1));
        let h = entry.handle().unwrap();
        assert_eq!(index.get(h), Some((&t1, &Arc::new("a"))));
        assert_eq!(entry.expire_at(), Some(t1));

        // t1 -> t2
        entry.reschedule(&mut index, Some(t2));
        assert_eq!(index.len(), 1);
        assert_eq!(index.first().map(|(t, _)| *t), Some(t2));

        // t2 -> never
        entry.reschedule(&mut index, None);
        assert!(index.is_empty());
        assert_eq!(entry.handle(), None);
        assert_eq!(entry.expire_at(), None);

        // never -> never
        entry.reschedule(&mut index, None);
        assert!(index.is_empty());
    }

    #[test]
    fn reschedule_after_the_handle_was_popped() {
        let (clock, _fake) = Clock::fake();
        let t1 = clock.now().saturating_add(Duration::from_secs(1));

        let mut index = ExpirationIndex::new();
        let mut entry = Entry::<u32, u32, ()>::new(Arc::new(1), Arc::new(Mutex::new(None)));
        entry.reschedule(&mut index, Some(t1));
        index.pop_first();

        // A stale handle is replaced by a fresh insertion.
        entry.reschedule(&mut index, Some(t1));
        assert_eq!(index.len(), 1);
        assert!(index.get(entry.handle().unwrap()).is_some());
    }

    #[test]
    fn a_loading_entry_is_indexed_when_the_load_finishes() {
        let (clock, _fake) = Clock::fake();
        let t1 = clock.now().saturating_add(Duration::from_secs(1));
        let t2 = clock.now().saturating_add(Duration::from_secs(2));

        let mut index = ExpirationIndex::new();
        let mut entry =
            Entry::<u32, u32, ()>::loading(Arc::new(1), Arc::new(Mutex::new(None)), Some(t1));
        assert_eq!(entry.expire_at(), None);
        assert!(index.is_empty());

        // A later expiry replaces the deferred one.
        entry.schedule(&mut index, Some(t2));
        assert!(index.is_empty());

        assert!(entry.finish_loading(&mut index));
        assert_eq!(entry.expire_at(), Some(t2));
        assert_eq!(index.first().map(|(t, _)| *t), Some(t2));

        // Once loaded, scheduling goes straight to the index.
        assert!(!entry.finish_loading(&mut index));
        entry.schedule(&mut index, None);
        assert!(index.is_empty());
    }
}
