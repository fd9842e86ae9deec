//! Batched allocation from leased ranges.
//!
//! A [`BatchedAllocator`] reserves ranges of `batch_size` values from a
//! [`CounterSource`] and serves callers from the in-memory lease, so only one
//! call in `batch_size` touches durable storage.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::contracts::{
    CounterSource, DurableStore, LockResultExt, SequenceError, SequenceGenerator,
};
use crate::metrics::SequenceMetrics;
use crate::storage::{env_or, DurableCounter, RetryConfig};

/// Called with `(first_discarded, discarded_count)` when a non-empty lease
/// is abandoned.
pub type DiscardHook = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Configuration for batched allocation.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Values reserved per durable advance. Requests larger than one batch
    /// reserve a whole multiple of it.
    pub batch_size: u64,
    /// Retry budget for the durable counter's compare-and-swap loop.
    pub retry: RetryConfig,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            retry: RetryConfig::default(),
        }
    }
}

impl AllocatorConfig {
    /// Creates a config from environment variables.
    ///
    /// - `SEQLEASE_BATCH_SIZE`: values per lease (default: 100)
    /// - retry settings as read by [`RetryConfig::from_env`]
    pub fn from_env() -> Self {
        Self {
            batch_size: env_or("SEQLEASE_BATCH_SIZE", Self::default().batch_size),
            retry: RetryConfig::from_env(),
        }
    }

    pub fn validate(&self) -> Result<(), SequenceError> {
        if self.batch_size == 0 {
            return Err(SequenceError::InvalidArgument(
                "batch size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Builds a durable counter over `store` using this config's retry budget.
    pub fn durable_counter<S: DurableStore>(&self, store: S) -> DurableCounter<S> {
        DurableCounter::with_retry(store, self.retry.clone())
    }
}

/// Values reserved for this allocator and not yet handed out: `[current, limit)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Lease {
    current: u64,
    limit: u64,
}

impl Lease {
    fn remaining(&self) -> u64 {
        self.limit - self.current
    }
}

/// Serves identifiers from leases taken in bulk from a shared counter.
///
/// Values from one allocator are strictly increasing. Allocators sharing a
/// counter never hand out the same value, because each lease is claimed by a
/// compare-and-swap advance of the counter; the price is that an allocator's
/// own sequence has gaps wherever other allocators leased in between.
///
/// When a request does not fit the current lease, the unused tail is
/// discarded (reported to the discard hook if non-empty) and a new lease of
/// `ceil(n / batch_size) * batch_size` values replaces it. The tail is never
/// reissued.
///
/// The discard hook runs while the allocator lock is held and must not call
/// back into the same allocator.
pub struct BatchedAllocator<C: ?Sized> {
    batch_size: u64,
    lease: Mutex<Option<Lease>>,
    on_discard: DiscardHook,
    metrics: Arc<SequenceMetrics>,
    source: Arc<C>,
}

impl<C: CounterSource + ?Sized> BatchedAllocator<C> {
    /// Creates an allocator leasing `batch_size` values at a time from `source`.
    pub fn new(source: Arc<C>, batch_size: u64) -> Result<Self, SequenceError> {
        let config = AllocatorConfig {
            batch_size,
            ..AllocatorConfig::default()
        };
        Self::from_config(source, &config)
    }

    pub fn from_config(source: Arc<C>, config: &AllocatorConfig) -> Result<Self, SequenceError> {
        config.validate()?;
        Ok(Self {
            batch_size: config.batch_size,
            lease: Mutex::new(None),
            on_discard: Box::new(log_discard),
            metrics: Arc::new(SequenceMetrics::new()),
            source,
        })
    }

    /// Replaces the discard hook.
    pub fn on_discard(mut self, hook: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        self.on_discard = Box::new(hook);
        self
    }

    /// Replaces the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<SequenceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<SequenceMetrics> {
        &self.metrics
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    pub fn source(&self) -> &Arc<C> {
        &self.source
    }

    /// Returns how many values the current lease can still serve.
    pub fn remaining(&self) -> Result<u64, SequenceError> {
        let lease = self.lease.lock().map_lock_err()?;
        Ok(lease.as_ref().map_or(0, Lease::remaining))
    }

    /// Abandons the current lease so the next request re-synchronizes with
    /// the counter. A non-empty tail is reported to the discard hook.
    pub fn reset(&self) -> Result<(), SequenceError> {
        let mut lease = self.lease.lock().map_lock_err()?;
        if let Some(old) = lease.take() {
            self.discard(old);
        }
        Ok(())
    }

    /// Reserves `n` contiguous values and returns the first.
    fn reserve(&self, n: u64) -> Result<u64, SequenceError> {
        if n == 0 {
            return Err(SequenceError::InvalidArgument(
                "allocation size must be greater than zero".into(),
            ));
        }

        let mut lease = self.lease.lock().map_lock_err()?;
        if let Some(held) = lease.as_mut() {
            if held.remaining() >= n {
                let first = held.current;
                held.current += n;
                self.metrics.record_issued(n);
                return Ok(first);
            }
        }

        // The old lease stays installed until the new range is secured, so a
        // failed advance leaves the allocator exactly as it was.
        let span = self.span_for(n)?;
        let upper = self.source.advance(span)?;
        let lower = upper.checked_sub(span).ok_or_else(|| {
            SequenceError::CorruptState(format!(
                "counter returned {} for an advance of {}",
                upper, span
            ))
        })?;

        if let Some(old) = lease.take() {
            self.discard(old);
        }
        *lease = Some(Lease {
            current: lower + n,
            limit: upper,
        });

        self.metrics.record_lease();
        self.metrics.record_issued(n);
        tracing::debug!(lower, upper, requested = n, "Acquired sequence lease");
        Ok(lower)
    }

    /// Lease size for a request of `n`: `n` rounded up to whole batches.
    fn span_for(&self, n: u64) -> Result<u64, SequenceError> {
        n.div_ceil(self.batch_size)
            .checked_mul(self.batch_size)
            .ok_or(SequenceError::Overflow)
    }

    fn discard(&self, old: Lease) {
        let count = old.remaining();
        if count == 0 {
            return;
        }

        self.metrics.record_discard(count);
        let hook = AssertUnwindSafe(|| (self.on_discard)(old.current, count));
        if catch_unwind(hook).is_err() {
            self.metrics.record_hook_panic();
            tracing::error!(
                first = old.current,
                count,
                "Discard hook panicked; continuing with new lease"
            );
        }
    }
}

impl<C: CounterSource + ?Sized> SequenceGenerator for BatchedAllocator<C> {
    fn increment_and_get(&self) -> Result<u64, SequenceError> {
        self.reserve(1)
    }

    fn add_and_get(&self, n: u64) -> Result<u64, SequenceError> {
        let first = self.reserve(n)?;
        Ok(first + n - 1)
    }
}

/// Lets an allocator lease ranges to another allocator.
impl<C: CounterSource + ?Sized> CounterSource for BatchedAllocator<C> {
    fn advance(&self, delta: u64) -> Result<u64, SequenceError> {
        let first = self.reserve(delta)?;
        Ok(first + delta)
    }
}

fn log_discard(first: u64, count: u64) {
    tracing::info!(first, count, "Discarded unused sequence lease tail");
}
