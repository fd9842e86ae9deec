use std::path::Path;

use rocksdb::{ErrorKind, OptimisticTransactionDB, Options};

use crate::contracts::store::parse_stored;
use crate::contracts::{DurableStore, StoreError};

/// Key used when the caller does not name one.
pub const DEFAULT_SEQUENCE_KEY: &str = "seq:default";

/// Durable store keeping the value under one key of a RocksDB database.
///
/// Uses an optimistic transaction database: a compare-and-swap reads the key
/// with `get_for_update`, and a commit that loses to a concurrent writer is
/// reported as a failed swap rather than an error. RocksDB allows a single
/// process to open a database, so participants share one handle (e.g. an
/// `Arc<RocksDbStore>`).
pub struct RocksDbStore {
    db: OptimisticTransactionDB,
    key: Vec<u8>,
}

impl RocksDbStore {
    /// Opens or creates the database at `path` using [`DEFAULT_SEQUENCE_KEY`],
    /// seeding the key with 0 if it is absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_key(path, DEFAULT_SEQUENCE_KEY, 0)
    }

    /// Opens or creates the database at `path`, seeding `key` with `seed`
    /// if it is absent. An existing value is never overwritten.
    pub fn open_key(path: impl AsRef<Path>, key: &str, seed: u64) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = OptimisticTransactionDB::open(&opts, path.as_ref()).map_err(rocks_err)?;
        let store = Self {
            db,
            key: key.as_bytes().to_vec(),
        };
        store.seed(seed)?;
        Ok(store)
    }

    fn seed(&self, seed: u64) -> Result<(), StoreError> {
        let txn = self.db.transaction();
        if txn
            .get_for_update(&self.key, true)
            .map_err(rocks_err)?
            .is_some()
        {
            return Ok(());
        }
        txn.put(&self.key, seed.to_string()).map_err(rocks_err)?;

        match txn.commit() {
            Ok(()) => {
                tracing::info!(key = %String::from_utf8_lossy(&self.key), seed, "Seeded sequence key");
                Ok(())
            }
            // Another handle seeded it first.
            Err(e) if is_conflict(&e) => Ok(()),
            Err(e) => Err(rocks_err(e)),
        }
    }
}

impl DurableStore for RocksDbStore {
    fn read(&self) -> Result<u64, StoreError> {
        match self.db.get(&self.key).map_err(rocks_err)? {
            Some(raw) => parse_stored(&raw),
            None => Err(StoreError::Corrupt(format!(
                "sequence key {} is missing",
                String::from_utf8_lossy(&self.key)
            ))),
        }
    }

    fn compare_and_swap(&self, expected: u64, new: u64) -> Result<bool, StoreError> {
        let txn = self.db.transaction();
        let current = match txn.get_for_update(&self.key, true).map_err(rocks_err)? {
            Some(raw) => parse_stored(&raw)?,
            None => return Ok(false),
        };
        if current != expected {
            return Ok(false);
        }

        txn.put(&self.key, new.to_string()).map_err(rocks_err)?;
        match txn.commit() {
            Ok(()) => Ok(true),
            Err(e) if is_conflict(&e) => Ok(false),
            Err(e) => Err(rocks_err(e)),
        }
    }
}

fn is_conflict(e: &rocksdb::Error) -> bool {
    matches!(e.kind(), ErrorKind::Busy | ErrorKind::TryAgain)
}

fn rocks_err(e: rocksdb::Error) -> StoreError {
    StoreError::RocksDb(e.to_string())
}
