use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Finite latency bucket upper bounds in milliseconds. `+Inf` is implied by the total count.
pub const LATENCY_BUCKETS_MS: [u64; 10] = [10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10000];

/// Lock-free cumulative latency histogram.
///
/// Each observation increments every bucket whose bound is `>=` the value, so bucket counts
/// are cumulative the way the Prometheus exposition format expects.
#[derive(Debug, Default)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BUCKETS_MS.len()],
    sum_ms: AtomicU64,
    count: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketCount {
    /// Upper bound label, `"+Inf"` for the last bucket.
    pub le: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramSnapshot {
    pub buckets: Vec<BucketCount>,
    pub sum: u64,
    pub count: u64,
}

impl LatencyHistogram {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, latency_ms: u64) {
        for (bound, bucket) in LATENCY_BUCKETS_MS.iter().zip(&self.buckets) {
            if latency_ms <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn sum(&self) -> u64 {
        self.sum_ms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean latency, or `None` before the first observation.
    #[must_use]
    pub fn average(&self) -> Option<f64> {
        let count = self.count();
        #[allow(clippy::cast_precision_loss)]
        (count > 0).then(|| self.sum() as f64 / count as f64)
    }

    /// `(upper bound, cumulative count)` pairs for the finite buckets, in ascending order.
    pub fn buckets(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        LATENCY_BUCKETS_MS
            .iter()
            .zip(&self.buckets)
            .map(|(bound, bucket)| (*bound, bucket.load(Ordering::Relaxed)))
    }

    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count();
        let mut buckets: Vec<BucketCount> = self
            .buckets()
            .map(|(bound, count)| BucketCount { le: bound.to_string(), count })
            .collect();
        buckets.push(BucketCount { le: "+Inf".to_string(), count });

        HistogramSnapshot { buckets, sum: self.sum(), count }
    }

    pub fn reset(&self) {
        for bucket in &self.buckets {
            bucket.store(0, Ordering::Relaxed);
        }
        self.sum_ms.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(snapshot: &HistogramSnapshot, le: &str) -> u64 {
        snapshot.buckets.iter().find(|b| b.le == le).map(|b| b.count).unwrap()
    }

    #[test]
    fn test_observations_are_cumulative() {
        let histogram = LatencyHistogram::new();
        for latency in [5, 15, 30] {
            histogram.observe(latency);
        }

        let snapshot = histogram.snapshot();
        assert_eq!(bucket(&snapshot, "10"), 1);
        assert_eq!(bucket(&snapshot, "25"), 2);
        assert_eq!(bucket(&snapshot, "50"), 3);
        assert_eq!(bucket(&snapshot, "10000"), 3);
        assert_eq!(bucket(&snapshot, "+Inf"), 3);
        assert_eq!(snapshot.sum, 50);
        assert_eq!(snapshot.count, 3);
    }

    #[test]
    fn test_boundary_value_lands_in_its_bucket() {
        let histogram = LatencyHistogram::new();
        histogram.observe(25);

        let counts: Vec<_> = histogram.buckets().collect();
        assert_eq!(counts[0], (10, 0));
        assert_eq!(counts[1], (25, 1));
    }

    #[test]
    fn test_overflow_only_counts_in_inf() {
        let histogram = LatencyHistogram::new();
        histogram.observe(30_000);

        assert!(histogram.buckets().all(|(_, count)| count == 0));
        assert_eq!(bucket(&histogram.snapshot(), "+Inf"), 1);
    }

    #[test]
    fn test_average_and_reset() {
        let histogram = LatencyHistogram::new();
        assert_eq!(histogram.average(), None);

        histogram.observe(100);
        histogram.observe(300);
        assert_eq!(histogram.average(), Some(200.0));

        histogram.reset();
        assert_eq!(histogram.count(), 0);
        assert_eq!(histogram.sum(), 0);
        assert!(histogram.buckets().all(|(_, count)| count == 0));
    }
}
