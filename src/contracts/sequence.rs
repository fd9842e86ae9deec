use crate::contracts::error::SequenceError;

/// Something that can atomically reserve a contiguous block of values.
///
/// Implemented by the durable counter and by batched allocators, so an
/// allocator can lease from either.
pub trait CounterSource: Send + Sync {
    /// Reserves `delta` values and returns the new exclusive upper bound.
    /// The caller owns `[returned - delta, returned)`.
    fn advance(&self, delta: u64) -> Result<u64, SequenceError>;
}

impl<C: CounterSource + ?Sized> CounterSource for std::sync::Arc<C> {
    fn advance(&self, delta: u64) -> Result<u64, SequenceError> {
        (**self).advance(delta)
    }
}

/// Generates strictly increasing identifiers.
///
/// # Invariants
/// - Values returned by one generator are strictly increasing.
/// - Generators sharing a durable counter never return the same value.
/// - Survives process restart (values after restart are above any value
///   issued before it).
pub trait SequenceGenerator: Send + Sync {
    /// Reserves one value and returns it.
    fn increment_and_get(&self) -> Result<u64, SequenceError>;

    /// Reserves `n` contiguous values and returns the highest of them.
    fn add_and_get(&self, n: u64) -> Result<u64, SequenceError>;
}
