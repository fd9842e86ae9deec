use std::sync::atomic::{AtomicU64, Ordering};

use crate::contracts::{DurableStore, StoreError};

/// In-process store backed by a single atomic.
///
/// Not durable. Useful as a test double and for allocators that only need
/// uniqueness within one process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    value: AtomicU64,
}

impl MemoryStore {
    pub fn new(seed: u64) -> Self {
        Self {
            value: AtomicU64::new(seed),
        }
    }

    /// Overwrites the value unconditionally, the way an external writer or
    /// an operator reset would.
    pub fn store(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
    }
}

impl DurableStore for MemoryStore {
    fn read(&self) -> Result<u64, StoreError> {
        Ok(self.value.load(Ordering::SeqCst))
    }

    fn compare_and_swap(&self, expected: u64, new: u64) -> Result<bool, StoreError> {
        Ok(self
            .value
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }
}
