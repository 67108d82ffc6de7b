//! Counters describing reverse k-nearest-neighbor query work.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the reverse kNN counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RkNNStatistic {
    /// Objects returned, summed over all queries.
    pub no_results: u64,
    /// Objects that needed exact refinement.
    pub no_candidates: u64,
    /// Objects accepted from their progressive bound alone.
    pub no_true_hits: u64,
}

impl RkNNStatistic {
    /// Results that came out of candidate refinement.
    pub fn promoted_candidates(&self) -> u64 {
        self.no_results.saturating_sub(self.no_true_hits)
    }
}

/// Lock-free accumulator behind [`RkNNStatistic`], shared by concurrent queries.
#[derive(Debug, Default)]
pub(crate) struct RkNNCounters {
    no_results: AtomicU64,
    no_candidates: AtomicU64,
    no_true_hits: AtomicU64,
}

impl RkNNCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, true_hits: usize, candidates: usize, results: usize) {
        self.no_true_hits
            .fetch_add(true_hits as u64, Ordering::Relaxed);
        self.no_candidates
            .fetch_add(candidates as u64, Ordering::Relaxed);
        self.no_results.fetch_add(results as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RkNNStatistic {
        RkNNStatistic {
            no_results: self.no_results.load(Ordering::Relaxed),
            no_candidates: self.no_candidates.load(Ordering::Relaxed),
            no_true_hits: self.no_true_hits.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn clear(&self) {
        self.no_results.store(0, Ordering::Relaxed);
        self.no_candidates.store(0, Ordering::Relaxed);
        self.no_true_hits.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_and_clear() {
        let counters = RkNNCounters::new();
        counters.record(2, 3, 4);
        counters.record(1, 0, 1);

        let stats = counters.snapshot();
        assert_eq!(stats.no_true_hits, 3);
        assert_eq!(stats.no_candidates, 3);
        assert_eq!(stats.no_results, 5);
        assert_eq!(stats.promoted_candidates(), 2);

        counters.clear();
        assert_eq!(counters.snapshot(), RkNNStatistic::default());
    }
}
