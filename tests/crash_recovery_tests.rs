//! Restart tests for durable sequence allocation.
//!
//! These tests verify that identifiers issued after a restart are above
//! everything issued before it, and that damaged state is refused.
//! Run with: cargo test --test crash_recovery_tests

use std::path::Path;
use std::sync::{Arc, Mutex};

use seqlease::allocator::BatchedAllocator;
use seqlease::contracts::{SequenceError, SequenceGenerator};
use seqlease::storage::{DurableCounter, FileStore, RocksDbStore};
use tempfile::TempDir;

fn file_allocator(path: &Path, batch_size: u64) -> BatchedAllocator<DurableCounter<FileStore>> {
    let store = FileStore::open(path).expect("Failed to open sequence file");
    BatchedAllocator::new(Arc::new(DurableCounter::new(store)), batch_size).unwrap()
}

// =============================================================================
// Restart Tests
// =============================================================================

/// A restart abandons the in-flight lease; the next process starts at the
/// persisted boundary.
#[test]
fn restart_resumes_above_abandoned_lease() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sequence");

    // Phase 1: issue part of a lease, then "crash" by dropping the allocator.
    let last = {
        let alloc = file_allocator(&path, 100);
        let mut last = 0;
        for _ in 0..26 {
            last = alloc.increment_and_get().unwrap();
        }
        last
    };
    assert_eq!(last, 25);

    // Phase 2: the file holds the lease boundary, not the last issued value.
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "100");
    let alloc = file_allocator(&path, 100);
    assert_eq!(alloc.increment_and_get().unwrap(), 100);
}

#[test]
fn restart_with_smaller_batch_stays_monotonic() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sequence");

    let before = {
        let alloc = file_allocator(&path, 1_000);
        alloc.add_and_get(10).unwrap()
    };

    let alloc = file_allocator(&path, 10);
    let after: Vec<u64> = (0..25).map(|_| alloc.increment_and_get().unwrap()).collect();
    assert!(after[0] > before);
    assert_eq!(after[0], 1_000);
    assert_eq!(*after.last().unwrap(), 1_024);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "1030");
}

#[test]
fn reset_before_shutdown_reports_the_gap() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sequence");
    let gaps = Arc::new(Mutex::new(Vec::new()));

    {
        let sink = Arc::clone(&gaps);
        let alloc = file_allocator(&path, 50)
            .on_discard(move |first, count| sink.lock().unwrap().push((first, count)));
        alloc.add_and_get(20).unwrap();
        alloc.reset().unwrap();
    }
    assert_eq!(*gaps.lock().unwrap(), vec![(20, 30)]);

    let alloc = file_allocator(&path, 50);
    assert_eq!(alloc.increment_and_get().unwrap(), 50);
}

#[test]
fn rocksdb_counter_survives_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let store = RocksDbStore::open_key(dir.path(), "orders", 500).unwrap();
        let alloc = BatchedAllocator::new(Arc::new(DurableCounter::new(store)), 64).unwrap();
        assert_eq!(alloc.increment_and_get().unwrap(), 500);
    }

    let store = RocksDbStore::open_key(dir.path(), "orders", 0).unwrap();
    let alloc = BatchedAllocator::new(Arc::new(DurableCounter::new(store)), 64).unwrap();
    assert_eq!(alloc.increment_and_get().unwrap(), 564);
}

/// A writer killed while holding the write lock leaves `<path>.lock` behind;
/// the next process must still be able to lease.
#[test]
fn leftover_lock_file_after_crash_does_not_block_allocation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sequence");

    {
        let alloc = file_allocator(&path, 10);
        assert_eq!(alloc.increment_and_get().unwrap(), 0);
    }
    std::fs::write(dir.path().join("sequence.lock"), "").unwrap();

    let alloc = file_allocator(&path, 10);
    assert_eq!(alloc.increment_and_get().unwrap(), 10);
    assert_eq!(alloc.add_and_get(15).unwrap(), 34);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "40");
}

// =============================================================================
// Damaged State
// =============================================================================

#[test]
fn corrupt_file_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sequence");
    std::fs::write(&path, "twelve").unwrap();

    let alloc = file_allocator(&path, 10);
    assert!(matches!(
        alloc.increment_and_get(),
        Err(SequenceError::CorruptState(_))
    ));
    // Nothing was coerced or overwritten.
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "twelve");
}

#[test]
fn negative_file_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sequence");
    std::fs::write(&path, "-40\n").unwrap();

    let counter = DurableCounter::new(FileStore::open(&path).unwrap());
    assert!(matches!(counter.read(), Err(SequenceError::CorruptState(_))));
}

#[test]
fn rolled_back_file_is_detected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sequence");

    let alloc = file_allocator(&path, 10);
    alloc.add_and_get(10).unwrap();

    // Someone restores an old copy of the file behind the allocator's back.
    std::fs::write(&path, "0").unwrap();
    assert!(matches!(
        alloc.increment_and_get(),
        Err(SequenceError::CorruptState(_))
    ));
}

#[test]
fn allocator_recovers_after_transient_fault() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sequence");

    let store = FileStore::open(&path).unwrap();
    let counter = DurableCounter::with_retry(
        store,
        seqlease::storage::RetryConfig {
            max_retries: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        },
    );
    let alloc = BatchedAllocator::new(Arc::new(counter), 5).unwrap();
    assert_eq!(alloc.add_and_get(5).unwrap(), 4);

    // Value file temporarily unavailable.
    std::fs::rename(&path, dir.path().join("moved")).unwrap();
    assert!(matches!(
        alloc.increment_and_get(),
        Err(SequenceError::StorageFault(_))
    ));

    std::fs::rename(dir.path().join("moved"), &path).unwrap();
    assert_eq!(alloc.increment_and_get().unwrap(), 5);
}
