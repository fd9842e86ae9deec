use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use super::Histogram;

/// Counters describing how identifiers were issued.
///
/// One instance is usually shared (via `Arc`) between a durable counter and
/// every allocator leasing from it, so the totals describe the whole sequence.
#[derive(Default)]
pub struct SequenceMetrics {
    /// Values handed to callers
    pub values_issued_total: AtomicU64,
    /// Leases obtained from the underlying counter
    pub leases_acquired_total: AtomicU64,
    /// Values abandoned in discarded lease tails
    pub values_discarded_total: AtomicU64,
    /// Discard hooks that panicked
    pub discard_hook_panics_total: AtomicU64,
    /// Compare-and-swap attempts that did not land. Counts both lost races
    /// and spurious failures, e.g. a `FileStore` whose write lock was held by
    /// another writer; stores do not distinguish the two.
    pub cas_conflicts_total: AtomicU64,
    /// Latency of successful durable advances
    pub advance_duration_us: Histogram,
}

impl SequenceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_issued(&self, count: u64) {
        self.values_issued_total.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_lease(&self) {
        self.leases_acquired_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_discard(&self, count: u64) {
        self.values_discarded_total
            .fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_hook_panic(&self) {
        self.discard_hook_panics_total
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cas_conflict(&self) {
        self.cas_conflicts_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_advance(&self, duration_us: u64) {
        self.advance_duration_us.observe(duration_us);
    }

    /// Formats all metrics in Prometheus exposition format.
    pub fn format_prometheus(&self) -> String {
        let counters = [
            (
                "seqlease_values_issued_total",
                "Values handed to callers",
                &self.values_issued_total,
            ),
            (
                "seqlease_leases_acquired_total",
                "Leases obtained from the underlying counter",
                &self.leases_acquired_total,
            ),
            (
                "seqlease_values_discarded_total",
                "Values abandoned in discarded lease tails",
                &self.values_discarded_total,
            ),
            (
                "seqlease_discard_hook_panics_total",
                "Discard hooks that panicked",
                &self.discard_hook_panics_total,
            ),
            (
                "seqlease_cas_conflicts_total",
                "Compare-and-swap attempts that did not land, including lock contention",
                &self.cas_conflicts_total,
            ),
        ];

        let mut output = String::with_capacity(2048);
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {} {}", name, help);
            let _ = writeln!(output, "# TYPE {} counter", name);
            let _ = writeln!(output, "{} {}", name, value.load(Ordering::Relaxed));
            output.push('\n');
        }
        output.push_str(&self.advance_duration_us.format_prometheus(
            "seqlease_advance_duration_us",
            "Latency of successful durable advances in microseconds",
        ));
        output
    }
}
