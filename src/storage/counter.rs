use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use backon::BlockingRetryable;

use crate::contracts::{CounterSource, DurableStore, SequenceError, SequenceGenerator, StoreError};
use crate::metrics::SequenceMetrics;
use crate::storage::RetryConfig;

/// Monotonic integer persisted in a [`DurableStore`], advanced with an
/// optimistic compare-and-swap loop.
///
/// Any number of counters, in any number of processes, may share one store.
/// `advance` never takes a lock on the store: it reads the value, tries to
/// swap in `value + delta`, and on conflict re-reads and tries again, up to
/// `RetryConfig::max_attempts` times with jittered exponential backoff.
pub struct DurableCounter<S> {
    store: S,
    retry: RetryConfig,
    /// Highest value this handle has seen persisted; the store must never
    /// go below it.
    high_water: AtomicU64,
    metrics: Arc<SequenceMetrics>,
}

/// Outcome of one failed compare-and-swap attempt.
enum Attempt {
    Conflict { observed: u64 },
    Store(StoreError),
    Fatal(SequenceError),
}

impl Attempt {
    fn is_retryable(&self) -> bool {
        match self {
            Attempt::Conflict { .. } => true,
            Attempt::Store(e) => e.is_retryable(),
            Attempt::Fatal(_) => false,
        }
    }

    fn into_error(self, attempts: usize) -> SequenceError {
        match self {
            Attempt::Conflict { observed } => SequenceError::StorageFault(format!(
                "compare-and-swap retries exhausted after {} attempts (last observed {})",
                attempts, observed
            )),
            Attempt::Store(e) => e.into(),
            Attempt::Fatal(e) => e,
        }
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attempt::Conflict { observed } => {
                write!(f, "lost compare-and-swap race at {}", observed)
            }
            Attempt::Store(e) => write!(f, "{}", e),
            Attempt::Fatal(e) => write!(f, "{}", e),
        }
    }
}

impl<S: DurableStore> DurableCounter<S> {
    /// Creates a counter over `store` with the default retry budget.
    pub fn new(store: S) -> Self {
        Self::with_retry(store, RetryConfig::default())
    }

    pub fn with_retry(store: S, retry: RetryConfig) -> Self {
        Self {
            store,
            retry,
            high_water: AtomicU64::new(0),
            metrics: Arc::new(SequenceMetrics::new()),
        }
    }

    /// Replaces the metrics sink, typically to share one with allocators.
    pub fn with_metrics(mut self, metrics: Arc<SequenceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<SequenceMetrics> {
        &self.metrics
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns the currently persisted value.
    pub fn read(&self) -> Result<u64, SequenceError> {
        self.load().map_err(|e| e.into_error(1))
    }

    /// Atomically adds `delta` to the persisted value and returns the new value.
    pub fn advance(&self, delta: u64) -> Result<u64, SequenceError> {
        if delta == 0 {
            return Err(SequenceError::InvalidArgument(
                "advance delta must be greater than zero".into(),
            ));
        }

        let started = Instant::now();
        let attempt = || -> Result<u64, Attempt> {
            let observed = self.load()?;
            let next = observed
                .checked_add(delta)
                .ok_or(Attempt::Fatal(SequenceError::Overflow))?;
            if self
                .store
                .compare_and_swap(observed, next)
                .map_err(Attempt::Store)?
            {
                self.high_water.fetch_max(next, Ordering::SeqCst);
                Ok(next)
            } else {
                self.metrics.record_cas_conflict();
                Err(Attempt::Conflict { observed })
            }
        };

        let result = attempt
            .retry(self.retry.backoff())
            .sleep(std::thread::sleep)
            .when(Attempt::is_retryable)
            .notify(|err, dur| {
                tracing::debug!(error = %err, retry_in = ?dur, delta, "Durable advance failed, retrying");
            })
            .call();

        match result {
            Ok(value) => {
                self.metrics
                    .record_advance(started.elapsed().as_micros() as u64);
                Ok(value)
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(
                        error = %e,
                        attempts = self.retry.max_attempts(),
                        delta,
                        "Durable advance gave up"
                    );
                }
                Err(e.into_error(self.retry.max_attempts()))
            }
        }
    }

    /// Reads the store and checks it has not gone below a value this handle
    /// saw before the read started.
    fn load(&self) -> Result<u64, Attempt> {
        let floor = self.high_water.load(Ordering::SeqCst);
        let value = self.store.read().map_err(Attempt::Store)?;
        if value < floor {
            return Err(Attempt::Fatal(SequenceError::CorruptState(format!(
                "persisted value regressed from {} to {}",
                floor, value
            ))));
        }
        self.high_water.fetch_max(value, Ordering::SeqCst);
        Ok(value)
    }
}

impl<S: DurableStore> CounterSource for DurableCounter<S> {
    fn advance(&self, delta: u64) -> Result<u64, SequenceError> {
        DurableCounter::advance(self, delta)
    }
}

/// Unbatched generation: every value costs one durable advance.
impl<S: DurableStore> SequenceGenerator for DurableCounter<S> {
    fn increment_and_get(&self) -> Result<u64, SequenceError> {
        self.add_and_get(1)
    }

    fn add_and_get(&self, n: u64) -> Result<u64, SequenceError> {
        let upper = DurableCounter::advance(self, n)?;
        self.metrics.record_issued(n);
        Ok(upper - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::atomic::AtomicUsize;

    fn fast_retry(max_retries: usize) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Store where another writer sneaks in `bump` before each of the first
    /// `interferences` swaps.
    struct RacingStore {
        inner: MemoryStore,
        interferences: AtomicUsize,
        bump: u64,
    }

    impl RacingStore {
        fn new(seed: u64, interferences: usize, bump: u64) -> Self {
            Self {
                inner: MemoryStore::new(seed),
                interferences: AtomicUsize::new(interferences),
                bump,
            }
        }
    }

    impl DurableStore for RacingStore {
        fn read(&self) -> Result<u64, StoreError> {
            self.inner.read()
        }

        fn compare_and_swap(&self, expected: u64, new: u64) -> Result<bool, StoreError> {
            let remaining = self.interferences.load(Ordering::SeqCst);
            if remaining > 0 {
                self.interferences.store(remaining - 1, Ordering::SeqCst);
                let current = self.inner.read()?;
                self.inner.store(current + self.bump);
            }
            self.inner.compare_and_swap(expected, new)
        }
    }

    /// Store whose reads fail with a fixed error, counting calls.
    struct FailingStore {
        reads: AtomicUsize,
        corrupt: bool,
    }

    impl DurableStore for FailingStore {
        fn read(&self) -> Result<u64, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.corrupt {
                Err(StoreError::Corrupt("garbage".into()))
            } else {
                Err(StoreError::Io("device unavailable".into()))
            }
        }

        fn compare_and_swap(&self, _: u64, _: u64) -> Result<bool, StoreError> {
            unreachable!("reads always fail")
        }
    }

    #[test]
    fn advance_returns_new_value() {
        let counter = DurableCounter::new(MemoryStore::new(0));
        assert_eq!(counter.advance(100).unwrap(), 100);
        assert_eq!(counter.advance(5).unwrap(), 105);
        assert_eq!(counter.read().unwrap(), 105);
    }

    #[test]
    fn zero_delta_is_rejected() {
        let counter = DurableCounter::new(MemoryStore::new(3));
        assert!(matches!(
            counter.advance(0),
            Err(SequenceError::InvalidArgument(_))
        ));
        assert_eq!(counter.read().unwrap(), 3);
    }

    #[test]
    fn retries_past_concurrent_writer_without_losing_its_advance() {
        let counter = DurableCounter::with_retry(RacingStore::new(0, 1, 50), fast_retry(3));

        // The racing writer moves 0 -> 50 before our first swap lands.
        let value = counter.advance(10).unwrap();
        assert!(value >= 50 + 10);
        assert_eq!(value, 60);
        assert_eq!(counter.read().unwrap(), 60);
        assert_eq!(counter.metrics().cas_conflicts_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn exhausted_retries_surface_storage_fault() {
        let counter = DurableCounter::with_retry(RacingStore::new(0, usize::MAX, 1), fast_retry(2));

        let err = counter.advance(10).unwrap_err();
        assert!(matches!(err, SequenceError::StorageFault(ref m) if m.contains("3 attempts")));
        assert_eq!(counter.metrics().cas_conflicts_total.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn io_faults_are_retried_then_surfaced() {
        let store = FailingStore {
            reads: AtomicUsize::new(0),
            corrupt: false,
        };
        let counter = DurableCounter::with_retry(store, fast_retry(2));

        let err = counter.advance(1).unwrap_err();
        assert!(matches!(err, SequenceError::StorageFault(ref m) if m.contains("device unavailable")));
        assert_eq!(counter.store().reads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn corrupt_state_is_not_retried() {
        let store = FailingStore {
            reads: AtomicUsize::new(0),
            corrupt: true,
        };
        let counter = DurableCounter::with_retry(store, fast_retry(5));

        assert!(matches!(
            counter.advance(1),
            Err(SequenceError::CorruptState(_))
        ));
        assert_eq!(counter.store().reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn regression_is_corrupt_state() {
        let counter = DurableCounter::new(MemoryStore::new(0));
        counter.advance(100).unwrap();

        counter.store().store(40);
        assert!(matches!(counter.read(), Err(SequenceError::CorruptState(_))));
        assert!(matches!(
            counter.advance(1),
            Err(SequenceError::CorruptState(_))
        ));
    }

    #[test]
    fn overflow_is_reported() {
        let counter = DurableCounter::new(MemoryStore::new(u64::MAX - 1));
        assert_eq!(counter.advance(1).unwrap(), u64::MAX);
        assert!(matches!(counter.advance(1), Err(SequenceError::Overflow)));
    }

    #[test]
    fn generator_conventions() {
        let counter = DurableCounter::new(MemoryStore::new(0));
        assert_eq!(counter.increment_and_get().unwrap(), 0);
        assert_eq!(counter.add_and_get(10).unwrap(), 10);
        assert_eq!(counter.increment_and_get().unwrap(), 11);
        assert_eq!(counter.metrics().values_issued_total.load(Ordering::Relaxed), 12);
    }
}
