use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::{atomic::AtomicCell, CachePadded};
use once_cell::sync::Lazy;

use crate::stats::CacheStats;

static NUM_COUNTERS: Lazy<usize> = Lazy::new(|| {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
});

/// Counters for [`CacheStats`]. Request counters are striped across threads to
/// keep hot-path increments off a single cache line.
pub(crate) struct StatsCounter {
    request_counters: Box<[CachePadded<RequestCounter>]>,
    expiration_count: CachePadded<AtomicCell<u64>>,
}

#[derive(Default)]
struct RequestCounter {
    hit_count: AtomicCell<u64>,
    miss_count: AtomicCell<u64>,
    load_success_count: AtomicCell<u64>,
    load_failure_count: AtomicCell<u64>,
    total_load_time: AtomicCell<u64>,
}

impl Default for StatsCounter {
    fn default() -> Self {
        let request_counters = std::iter::repeat_with(Default::default)
            .take(*NUM_COUNTERS)
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            request_counters,
            expiration_count: Default::default(),
        }
    }
}

impl StatsCounter {
    pub(crate) fn record_hit(&self) {
        saturating_add(&self.request_counter().hit_count, 1);
    }

    pub(crate) fn record_miss(&self) {
        saturating_add(&self.request_counter().miss_count, 1);
    }

    pub(crate) fn record_load_success(&self, load_time_nanos: u64) {
        let req_counter = self.request_counter();
        saturating_add(&req_counter.load_success_count, 1);
        saturating_add(&req_counter.total_load_time, load_time_nanos);
    }

    pub(crate) fn record_load_failure(&self, load_time_nanos: u64) {
        let req_counter = self.request_counter();
        saturating_add(&req_counter.load_failure_count, 1);
        saturating_add(&req_counter.total_load_time, load_time_nanos);
    }

    pub(crate) fn record_expirations(&self, count: usize) {
        saturating_add(&self.expiration_count, count as u64);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        let hit_count = self.sum_counters(|c| c.hit_count.load());
        let miss_count = self.sum_counters(|c| c.miss_count.load());
        let load_success_count = self.sum_counters(|c| c.load_success_count.load());
        let load_failure_count = self.sum_counters(|c| c.load_failure_count.load());
        let total_load_time = self.sum_counters(|c| c.total_load_time.load());

        let mut stats = CacheStats::default();
        stats
            .set_req_counts(hit_count, miss_count)
            .set_load_counts(load_success_count, load_failure_count, total_load_time)
            .set_expiration_count(self.expiration_count.load());
        stats
    }

    fn request_counter(&self) -> &RequestCounter {
        thread_local! { static INDEX: usize = next_index() };
        INDEX.with(|i| &self.request_counters[*i % self.request_counters.len()])
    }

    fn sum_counters(&self, mut selector: impl FnMut(&RequestCounter) -> u64) -> u64 {
        self.request_counters
            .iter()
            .fold(0, |acc, counter| acc.saturating_add(selector(counter)))
    }
}

fn saturating_add(counter: &AtomicCell<u64>, value: u64) {
    let mut v0 = counter.load();
    loop {
        let v1 = v0.saturating_add(value);
        match counter.compare_exchange(v0, v1) {
            Ok(_) => break,
            Err(v2) => v0 = v2,
        }
    }
}

static INDEX: Lazy<AtomicUsize> = Lazy::new(Default::default);

fn next_index() -> usize {
    let mut i0 = INDEX.load(Ordering::Acquire);
    loop {
        let mut i1 = i0 + 1;
        if i1 >= *NUM_COUNTERS {
            i1 = 0;
        }
        match INDEX.compare_exchange_weak(i0, i1, Ordering::Acquire, Ordering::Relaxed) {
            Ok(_) => return i0,
            Err(i2) => i0 = i2,
        }
    }
}
