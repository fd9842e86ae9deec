use crate::contracts::error::StoreError;

/// A single durable non-negative integer shared by every participant.
///
/// # Contract
/// - `read` returns the persisted value, or `StoreError::Corrupt` if the
///   medium holds something that is not a non-negative integer.
/// - `compare_and_swap` writes `new` only if the persisted value is still
///   `expected`, and reports whether the write happened. A backend may fail
///   spuriously (return `false` while the value equals `expected`), e.g. when
///   another writer is mid-update; callers must treat `false` as "re-read and
///   try again".
pub trait DurableStore: Send + Sync {
    /// Returns the currently persisted value.
    fn read(&self) -> Result<u64, StoreError>;

    /// Atomically replaces `expected` with `new`.
    fn compare_and_swap(&self, expected: u64, new: u64) -> Result<bool, StoreError>;
}

impl<S: DurableStore + ?Sized> DurableStore for std::sync::Arc<S> {
    fn read(&self) -> Result<u64, StoreError> {
        (**self).read()
    }

    fn compare_and_swap(&self, expected: u64, new: u64) -> Result<bool, StoreError> {
        (**self).compare_and_swap(expected, new)
    }
}

/// Parses the decimal text representation shared by the on-disk backends.
pub(crate) fn parse_stored(raw: &[u8]) -> Result<u64, StoreError> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| StoreError::Corrupt(format!("stored value is not UTF-8: {}", e)))?
        .trim();
    if text.starts_with('-') {
        return Err(StoreError::Corrupt(format!(
            "stored value {:?} is negative",
            text
        )));
    }
    text.parse::<u64>()
        .map_err(|e| StoreError::Corrupt(format!("stored value {:?}: {}", text, e)))
}
