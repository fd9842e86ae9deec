//! Fixed-bucket latency histogram for durable advances.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bucket upper bounds in microseconds.
/// A durable advance is a read plus a conditional write, from an in-memory
/// swap (sub-microsecond) to an fsynced rename (milliseconds).
pub const HISTOGRAM_BUCKETS: [u64; 10] = [
    1, 10, 100, 500, 1_000, 5_000, 10_000, 50_000, 250_000, 1_000_000,
];

/// Cumulative-bucket histogram with lock-free recording.
///
/// ```
/// use seqlease::metrics::Histogram;
///
/// let histogram = Histogram::new();
/// histogram.observe(700);
/// assert_eq!(histogram.count(), 1);
/// assert_eq!(histogram.sum(), 700);
/// ```
#[derive(Default)]
pub struct Histogram {
    sum: AtomicU64,
    count: AtomicU64,
    buckets: [AtomicU64; HISTOGRAM_BUCKETS.len()],
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one observation in microseconds.
    #[inline]
    pub fn observe(&self, value_us: u64) {
        self.sum.fetch_add(value_us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        // Buckets are sorted, so every bound from the first match upwards counts it.
        let first = HISTOGRAM_BUCKETS.partition_point(|&bound| bound < value_us);
        for bucket in &self.buckets[first..] {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    /// Returns the cumulative count for each bucket bound.
    pub fn bucket_counts(&self) -> [u64; HISTOGRAM_BUCKETS.len()] {
        let mut counts = [0u64; HISTOGRAM_BUCKETS.len()];
        for (slot, bucket) in counts.iter_mut().zip(&self.buckets) {
            *slot = bucket.load(Ordering::Relaxed);
        }
        counts
    }

    /// Renders the histogram in Prometheus exposition format.
    pub fn format_prometheus(&self, name: &str, help: &str) -> String {
        let mut output = String::with_capacity(768);
        let _ = writeln!(output, "# HELP {} {}", name, help);
        let _ = writeln!(output, "# TYPE {} histogram", name);
        for (bound, count) in HISTOGRAM_BUCKETS.iter().zip(self.bucket_counts()) {
            let _ = writeln!(output, "{}_bucket{{le=\"{}\"}} {}", name, bound, count);
        }
        let count = self.count();
        let _ = writeln!(output, "{}_bucket{{le=\"+Inf\"}} {}", name, count);
        let _ = writeln!(output, "{}_sum {}", name, self.sum());
        let _ = writeln!(output, "{}_count {}", name, count);
        output
    }
}
