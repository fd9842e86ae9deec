//! Durable, strictly increasing identifiers without a durable write per value.
//!
//! A [`DurableCounter`](storage::DurableCounter) keeps one integer in a
//! [`DurableStore`](contracts::DurableStore) and advances it with an
//! optimistic compare-and-swap loop. A
//! [`BatchedAllocator`](allocator::BatchedAllocator) leases ranges from the
//! counter and serves values from memory.
//!
//! ```
//! use std::sync::Arc;
//! use seqlease::allocator::BatchedAllocator;
//! use seqlease::contracts::SequenceGenerator;
//! use seqlease::storage::{DurableCounter, MemoryStore};
//!
//! let counter = Arc::new(DurableCounter::new(MemoryStore::new(0)));
//! let ids = BatchedAllocator::new(counter, 100).unwrap();
//! assert_eq!(ids.increment_and_get().unwrap(), 0);
//! assert_eq!(ids.add_and_get(10).unwrap(), 10);
//! ```

pub mod allocator;
pub mod contracts;
pub mod metrics;
pub mod storage;
