use std::sync::{MutexGuard, PoisonError};

use thiserror::Error;

/// Extension trait for converting mutex poisoning into a crate error.
pub trait LockResultExt<T> {
    /// Converts a lock error to a SequenceError.
    fn map_lock_err(self) -> Result<T, SequenceError>;
}

impl<'a, T> LockResultExt<MutexGuard<'a, T>>
    for Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>
{
    #[inline]
    fn map_lock_err(self) -> Result<MutexGuard<'a, T>, SequenceError> {
        self.map_err(|e| SequenceError::LockPoisoned(e.to_string()))
    }
}

/// Faults raised by a [`DurableStore`](crate::contracts::DurableStore) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("RocksDB error: {0}")]
    RocksDb(String),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns true if repeating the operation may succeed.
    ///
    /// Corrupt content never heals by itself, so it is surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Corrupt(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("Storage fault: {0}")]
    StorageFault(String),

    #[error("Sequence overflow")]
    Overflow,

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl From<StoreError> for SequenceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt(msg) => SequenceError::CorruptState(msg),
            other => SequenceError::StorageFault(other.to_string()),
        }
    }
}
