//! Lifetime query statistics.
//!
//! Counters are relaxed atomics so searches can record them while holding
//! only a read lock on the index. Averages are computed on read; there is no
//! windowing, these are process-lifetime totals.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters accumulated across every query on an index.
#[derive(Debug, Default)]
pub struct QueryStats {
    queries: AtomicU64,
    hops: AtomicU64,
    distance_computations: AtomicU64,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one query's traversal counts into the lifetime totals.
    pub fn record(&self, hops: u64, distance_computations: u64) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.hops.fetch_add(hops, Ordering::Relaxed);
        self.distance_computations
            .fetch_add(distance_computations, Ordering::Relaxed);
    }

    /// Number of queries served since creation (or load).
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Lifetime average graph hops (or probed lists) per query.
    pub fn avg_hops(&self) -> f32 {
        average(self.hops.load(Ordering::Relaxed), self.query_count())
    }

    /// Lifetime average distance computations per query.
    pub fn avg_distance_computations(&self) -> f32 {
        average(
            self.distance_computations.load(Ordering::Relaxed),
            self.query_count(),
        )
    }
}

fn average(total: u64, count: u64) -> f32 {
    if count == 0 {
        0.0
    } else {
        total as f32 / count as f32
    }
}

/// Per-query traversal accounting, folded into [`QueryStats`] once the query
/// finishes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SearchCounters {
    pub hops: u64,
    pub distance_computations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats_report_zero() {
        let stats = QueryStats::new();
        assert_eq!(stats.query_count(), 0);
        assert_eq!(stats.avg_hops(), 0.0);
        assert_eq!(stats.avg_distance_computations(), 0.0);
    }

    #[test]
    fn test_averages_over_queries() {
        let stats = QueryStats::new();
        stats.record(10, 100);
        stats.record(20, 300);
        assert_eq!(stats.query_count(), 2);
        assert_eq!(stats.avg_hops(), 15.0);
        assert_eq!(stats.avg_distance_computations(), 200.0);
    }
}
