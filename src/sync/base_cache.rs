use std::{
    collections::HashMap,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

use parking_lot::Mutex;

use super::stats_counter::StatsCounter;
use crate::common::{
    entry::{Entry, ExpirationIndex, SharedSlot, SlotGuard},
    time::{Clock, Instant},
};

/// The outcome of a lookup in the structural section.
pub(crate) enum Lookup<V, E> {
    /// An entry exists. Its result may still be loading.
    Found(SharedSlot<V, E>),
    /// No entry exists and none was reserved.
    Absent,
    /// A new, unfilled entry was inserted, and this caller holds its lock.
    Reserved(SharedSlot<V, E>, SlotGuard<V, E>),
}

/// The dict and the expiration index. Only reachable inside
/// [`BaseCache::section`], which owns the structural lock.
pub(crate) struct Structure<K, V, E, S> {
    dict: HashMap<Arc<K>, Entry<K, V, E>, S>,
    index: ExpirationIndex<K>,
}

impl<K, V, E, S> Structure<K, V, E, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn remove_expired(&mut self, now: Instant) -> Vec<Entry<K, V, E>> {
        let mut expired = Vec::new();
        while let Some((&expire_at, _)) = self.index.first() {
            if expire_at > now {
                break;
            }
            if let Some((_, key)) = self.index.pop_first() {
                expired.extend(self.dict.remove(&key));
            }
        }
        expired
    }

    pub(crate) fn lookup_or_reserve(
        &mut self,
        key: &K,
        expire_at: Option<Instant>,
        reserve: bool,
    ) -> Lookup<V, E>
    where
        K: Clone,
    {
        if let Some(entry) = self.dict.get(key) {
            return Lookup::Found(Arc::clone(entry.slot()));
        }
        if !reserve {
            return Lookup::Absent;
        }

        let slot: SharedSlot<V, E> = Arc::new(Mutex::new(None));
        // The slot is not shared yet, so this never blocks.
        let guard = slot.lock_arc();

        let key = Arc::new(key.clone());
        let entry = Entry::loading(Arc::clone(&key), Arc::clone(&slot), expire_at);
        self.dict.insert(key, entry);

        Lookup::Reserved(slot, guard)
    }

    /// Gives the entry loaded into `slot` its expiry, if the dict still maps the
    /// key to that slot. An entry that expired while it was loading is removed
    /// and returned.
    pub(crate) fn finish_load(
        &mut self,
        key: &K,
        slot: &SharedSlot<V, E>,
        now: Instant,
    ) -> Option<Entry<K, V, E>> {
        let entry = self
            .dict
            .get_mut(key)
            .filter(|entry| Arc::ptr_eq(entry.slot(), slot))?;
        if !entry.finish_loading(&mut self.index) {
            return None;
        }
        match entry.expire_at() {
            Some(expire_at) if expire_at <= now => self.invalidate(key),
            _ => None,
        }
    }

    /// Inserts a filled entry for an absent key and returns `None`. For an
    /// existing key, only reschedules it and hands the key and value back
    /// together with the slot to write the value into.
    pub(crate) fn insert(
        &mut self,
        key: K,
        value: V,
        expire_at: Option<Instant>,
    ) -> Option<(SharedSlot<V, E>, K, V)> {
        if let Some(entry) = self.dict.get_mut(&key) {
            entry.schedule(&mut self.index, expire_at);
            return Some((Arc::clone(entry.slot()), key, value));
        }

        let key = Arc::new(key);
        let mut entry = Entry::new(Arc::clone(&key), Arc::new(Mutex::new(Some(Ok(value)))));
        entry.reschedule(&mut self.index, expire_at);
        self.dict.insert(key, entry);
        None
    }

    /// Removes the entry for `key` and returns it, to be dropped after the
    /// structural lock is released.
    pub(crate) fn invalidate(&mut self, key: &K) -> Option<Entry<K, V, E>> {
        let mut entry = self.dict.remove(key)?;
        entry.reschedule(&mut self.index, None);
        Some(entry)
    }

    /// Removes the entry for `key` only if it still owns `slot`.
    pub(crate) fn invalidate_slot(
        &mut self,
        key: &K,
        slot: &SharedSlot<V, E>,
    ) -> Option<Entry<K, V, E>> {
        let owns_slot = self
            .dict
            .get(key)
            .map_or(false, |entry| Arc::ptr_eq(entry.slot(), slot));
        if owns_slot {
            self.invalidate(key)
        } else {
            None
        }
    }

    pub(crate) fn invalidate_all(&mut self) -> Vec<Entry<K, V, E>> {
        self.index.clear();
        self.dict.drain().map(|(_, entry)| entry).collect()
    }

    pub(crate) fn contains_key(&self, key: &K) -> bool {
        self.dict.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.dict.len()
    }
}

pub(crate) struct BaseCache<K, V, E, S> {
    name: Option<String>,
    clock: Clock,
    structure: Mutex<Structure<K, V, E, S>>,
    stats: StatsCounter,
}

impl<K, V, E, S> BaseCache<K, V, E, S> {
    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn clock(&self) -> &Clock {
        &self.clock
    }

    pub(crate) fn stats(&self) -> &StatsCounter {
        &self.stats
    }
}

impl<K, V, E, S> BaseCache<K, V, E, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    pub(crate) fn new(
        name: Option<String>,
        initial_capacity: Option<usize>,
        build_hasher: S,
        clock: Clock,
    ) -> Self {
        let dict =
            HashMap::with_capacity_and_hasher(initial_capacity.unwrap_or_default(), build_hasher);
        Self {
            name,
            clock,
            structure: Mutex::new(Structure {
                dict,
                index: ExpirationIndex::new(),
            }),
            stats: StatsCounter::default(),
        }
    }

    /// Runs `f` under the structural lock, after removing every entry that
    /// expired at or before `now`.
    ///
    /// The lock is released before this returns, and `f` cannot keep the
    /// `Structure` borrowed. Entry locks must not be waited on inside `f`.
    /// Removed entries are dropped after the lock is released, as are the
    /// ones `f` returns.
    pub(crate) fn section<R>(
        &self,
        now: Instant,
        f: impl FnOnce(&mut Structure<K, V, E, S>) -> R,
    ) -> R {
        self.counted_section(now, f).1
    }

    /// Removes expired entries and returns how many were removed.
    pub(crate) fn purge_expired(&self) -> usize {
        self.counted_section(self.clock.now(), |_| ()).0
    }

    pub(crate) fn entry_count(&self) -> u64 {
        self.section(self.clock.now(), |s| s.len() as u64)
    }

    fn counted_section<R>(
        &self,
        now: Instant,
        f: impl FnOnce(&mut Structure<K, V, E, S>) -> R,
    ) -> (usize, R) {
        let (expired, r) = {
            let mut structure = self.structure.lock();
            let expired = structure.remove_expired(now);
            (expired, f(&mut *structure))
        };
        let purged = expired.len();
        std::mem::drop(expired);

        if purged > 0 {
            self.stats.record_expirations(purged);
            #[cfg(feature = "logging")]
            log::debug!(
                "{}Removed {purged} expired entries",
                crate::common::log_prefix(self.name())
            );
        }

        (purged, r)
    }
}

#[cfg(test)]
impl<K, V, E, S> BaseCache<K, V, E, S>
where
    K: Hash + Eq + std::fmt::Debug,
    S: BuildHasher,
{
    /// Panics unless the dict and the index agree with each other and no entry
    /// is expired at `now`. Takes only the structural lock and does not purge.
    pub(crate) fn is_structure_locked(&self) -> bool {
        self.structure.is_locked()
    }

    pub(crate) fn check_invariants(&self, now: Instant) {
        let structure = self.structure.lock();
        let Structure { dict, index } = &*structure;

        index.check_invariants();

        let mut indexed = 0;
        for (key, entry) in dict {
            match (entry.expire_at(), entry.handle()) {
                (Some(t), Some(h)) => {
                    let (at, k) = index.get(h).expect("stale handle");
                    assert_eq!(*at, t, "index and entry disagree on {key:?}");
                    assert_eq!(k, key);
                    assert!(t > now, "{key:?} expired but is still cached");
                    indexed += 1;
                }
                (None, None) => (),
                (expire_at, handle) => {
                    panic!("{key:?} has expire_at {expire_at:?} but handle {handle:?}")
                }
            }
        }
        assert_eq!(indexed, index.len(), "index has entries not in the dict");
        for (_, key) in index.iter() {
            assert!(dict.contains_key(key), "{key:?} is indexed but not cached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BaseCache, Lookup};
    use crate::Clock;

    use std::{collections::hash_map::RandomState, time::Duration};

    type Base = BaseCache<u32, &'static str, (), RandomState>;

    fn base() -> (Base, std::sync::Arc<crate::FakeClock>) {
        let (clock, fake) = Clock::fake();
        (BaseCache::new(None, None, RandomState::default(), clock), fake)
    }

    #[test]
    fn section_removes_expired_entries_first() {
        let (base, fake) = base();
        let now = base.clock().now();
        let secs = |n| Some(now.saturating_add(Duration::from_secs(n)));

        base.section(now, |s| {
            s.insert(1, "a", secs(1));
            s.insert(2, "b", secs(2));
            s.insert(3, "c", None);
        });
        base.check_invariants(now);

        fake.advance(Duration::from_secs(1));
        let now = base.clock().now();
        // Expiry is inclusive.
        let present = base.section(now, |s| (s.contains_key(&1), s.contains_key(&2), s.len()));
        assert_eq!(present, (false, true, 2));
        base.check_invariants(now);

        fake.advance(Duration::from_secs(10));
        assert_eq!(base.purge_expired(), 1);
        assert_eq!(base.entry_count(), 1);
        assert_eq!(base.stats().snapshot().expiration_count(), 2);
    }

    #[test]
    fn reserve_hands_out_a_locked_slot() {
        let (base, _fake) = base();
        let now = base.clock().now();

        let Lookup::Reserved(slot, mut guard) =
            base.section(now, |s| s.lookup_or_reserve(&1, None, true))
        else {
            panic!("expected a reservation");
        };
        assert!(slot.try_lock().is_none());

        match base.section(now, |s| s.lookup_or_reserve(&1, None, true)) {
            Lookup::Found(found) => assert!(std::sync::Arc::ptr_eq(&found, &slot)),
            _ => panic!("expected the reserved entry"),
        }

        *guard = Some(Ok("v"));
        drop(guard);
        assert_eq!(*slot.lock(), Some(Ok("v")));
        base.check_invariants(now);
    }

    #[test]
    fn lookup_without_reserving() {
        let (base, _fake) = base();
        let now = base.clock().now();
        assert!(matches!(
            base.section(now, |s| s.lookup_or_reserve(&1, None, false)),
            Lookup::Absent
        ));
        assert_eq!(base.entry_count(), 0);
    }

    #[test]
    fn insert_on_an_existing_key_returns_its_slot() {
        let (base, _fake) = base();
        let now = base.clock().now();
        let later = Some(now.saturating_add(Duration::from_secs(5)));

        assert!(base.section(now, |s| s.insert(1, "a", None)).is_none());
        let (slot, key, value) = base
            .section(now, |s| s.insert(1, "b", later))
            .expect("existing entry");
        assert_eq!((key, value), (1, "b"));
        assert_eq!(*slot.lock(), Some(Ok("a")));
        base.check_invariants(now);
    }

    #[test]
    fn invalidate_slot_checks_ownership() {
        let (base, _fake) = base();
        let now = base.clock().now();

        let Lookup::Reserved(old, guard) =
            base.section(now, |s| s.lookup_or_reserve(&1, None, true))
        else {
            panic!("expected a reservation");
        };
        drop(guard);
        base.section(now, |s| {
            assert!(s.invalidate(&1).is_some());
            assert!(s.invalidate(&1).is_none());
            s.insert(1, "new", None);
            // The key now maps to a different slot.
            assert!(s.invalidate_slot(&1, &old).is_none());
            assert!(s.contains_key(&1));
        });
        base.check_invariants(now);
    }

    #[test]
    fn cleanup_skips_an_entry_while_it_is_loading() {
        let (base, fake) = base();
        let now = base.clock().now();
        let expire_at = Some(now.saturating_add(Duration::from_secs(1)));

        let Lookup::Reserved(slot, mut guard) =
            base.section(now, |s| s.lookup_or_reserve(&1, expire_at, true))
        else {
            panic!("expected a reservation");
        };

        // The expiry passes while the loader is still running.
        fake.advance(Duration::from_secs(5));
        assert_eq!(base.purge_expired(), 0);
        let now = base.clock().now();
        assert!(matches!(
            base.section(now, |s| s.lookup_or_reserve(&1, None, true)),
            Lookup::Found(_)
        ));
        base.check_invariants(now);

        *guard = Some(Ok("v"));
        drop(guard);

        // The load is done, and its expiry has already passed.
        let removed = base.section(now, |s| s.finish_load(&1, &slot, now));
        assert!(removed.is_some());
        assert_eq!(base.entry_count(), 0);
        base.check_invariants(now);
    }

    #[test]
    fn a_finished_load_is_indexed() {
        let (base, fake) = base();
        let now = base.clock().now();
        let expire_at = Some(now.saturating_add(Duration::from_secs(10)));

        let Lookup::Reserved(slot, mut guard) =
            base.section(now, |s| s.lookup_or_reserve(&1, expire_at, true))
        else {
            panic!("expected a reservation");
        };
        *guard = Some(Ok("v"));
        drop(guard);

        assert!(base.section(now, |s| s.finish_load(&1, &slot, now)).is_none());
        // Finishing twice changes nothing.
        assert!(base.section(now, |s| s.finish_load(&1, &slot, now)).is_none());
        base.check_invariants(now);

        fake.advance(Duration::from_secs(10));
        assert_eq!(base.purge_expired(), 1);
        assert_eq!(base.entry_count(), 0);
    }

    #[test]
    fn insert_during_a_load_defers_its_expiry() {
        let (base, fake) = base();
        let now = base.clock().now();
        let secs = |n| Some(now.saturating_add(Duration::from_secs(n)));

        let Lookup::Reserved(slot, guard) =
            base.section(now, |s| s.lookup_or_reserve(&1, secs(1), true))
        else {
            panic!("expected a reservation");
        };
        assert!(base.section(now, |s| s.insert(1, "b", secs(3))).is_some());

        // Neither expiry applies before the load finishes.
        fake.advance(Duration::from_secs(3));
        assert_eq!(base.purge_expired(), 0);

        drop(guard);
        let now = base.clock().now();
        assert!(base.section(now, |s| s.finish_load(&1, &slot, now)).is_some());
        assert_eq!(base.entry_count(), 0);
    }

    mod drops {
        use super::super::BaseCache;
        use crate::Clock;

        use once_cell::sync::OnceCell;
        use std::{
            collections::hash_map::RandomState,
            sync::{
                atomic::{AtomicUsize, Ordering},
                Arc, Weak,
            },
            time::Duration,
        };

        type Base = BaseCache<u32, Tracked, (), RandomState>;

        #[derive(Default)]
        struct Counts {
            dropped: AtomicUsize,
            dropped_under_lock: AtomicUsize,
        }

        // Records whether the structural lock was held when it was dropped.
        struct Tracked {
            base: Arc<OnceCell<Weak<Base>>>,
            counts: Arc<Counts>,
        }

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.counts.dropped.fetch_add(1, Ordering::AcqRel);
                if let Some(base) = self.base.get().and_then(Weak::upgrade) {
                    if base.is_structure_locked() {
                        self.counts.dropped_under_lock.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
        }

        #[test]
        fn removed_values_are_dropped_outside_the_lock() {
            let (clock, fake) = Clock::fake();
            let base = Arc::new(Base::new(None, None, RandomState::default(), clock));
            let cell = Arc::new(OnceCell::new());
            let _ = cell.set(Arc::downgrade(&base));
            let counts = Arc::new(Counts::default());
            let tracked = || Tracked {
                base: Arc::clone(&cell),
                counts: Arc::clone(&counts),
            };

            let now = base.clock().now();
            let soon = Some(now.saturating_add(Duration::from_secs(1)));
            base.section(now, |s| {
                s.insert(1, tracked(), soon);
                s.insert(2, tracked(), soon);
                s.insert(3, tracked(), None);
                s.insert(4, tracked(), None);
            });

            base.section(now, |s| s.invalidate(&3));
            assert_eq!(counts.dropped.load(Ordering::Acquire), 1);

            fake.advance(Duration::from_secs(1));
            assert_eq!(base.purge_expired(), 2);
            assert_eq!(counts.dropped.load(Ordering::Acquire), 3);

            base.section(base.clock().now(), |s| s.invalidate_all());
            assert_eq!(counts.dropped.load(Ordering::Acquire), 4);
            assert_eq!(counts.dropped_under_lock.load(Ordering::Acquire), 0);
        }
    }
}
