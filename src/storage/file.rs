use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::contracts::store::parse_stored;
use crate::contracts::{DurableStore, StoreError};

/// Distinguishes seed files created concurrently by one process.
static SEED_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Durable store holding the value as decimal text in a single file.
///
/// Any number of handles, in this or other processes, may point at the same
/// path. Readers never lock: writes go to a sibling temp file that is fsynced
/// and renamed over the value file, so a read sees either the old or the new
/// value. Writers serialize through an advisory lock on a `<path>.lock`
/// file; a writer that finds the lock taken reports a failed
/// compare-and-swap instead of waiting. The kernel drops the lock when its
/// holder exits, so a crashed writer never blocks later ones. The lock file
/// itself stays on disk.
///
/// Renames and seed links are followed by an fsync of the parent directory,
/// so a committed advance survives power loss.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    tmp_path: PathBuf,
}

impl FileStore {
    /// Opens the store at `path`, seeding it with 0 if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_seed(path, 0)
    }

    /// Opens the store at `path`, seeding it with `seed` if it does not exist.
    /// An existing value is never overwritten.
    pub fn open_with_seed(path: impl Into<PathBuf>, seed: u64) -> Result<Self, StoreError> {
        let path = path.into();
        let store = Self {
            lock_path: sibling(&path, "lock"),
            tmp_path: sibling(&path, "tmp"),
            path,
        };
        store.seed(seed)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Publishes the seed through a hard link, which fails atomically when
    /// the value file already exists. Readers never observe a half-written seed.
    fn seed(&self, seed: u64) -> Result<(), StoreError> {
        if self.path.exists() {
            return Ok(());
        }

        let staging = sibling(
            &self.path,
            &format!(
                "seed.{}.{}",
                std::process::id(),
                SEED_COUNTER.fetch_add(1, Ordering::Relaxed)
            ),
        );
        write_synced(&staging, seed)?;
        let linked = fs::hard_link(&staging, &self.path);
        let _ = fs::remove_file(&staging);

        match linked {
            Ok(()) => {
                sync_parent(&self.path)?;
                tracing::info!(path = %self.path.display(), seed, "Seeded sequence file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl DurableStore for FileStore {
    fn read(&self) -> Result<u64, StoreError> {
        let raw = fs::read(&self.path)?;
        parse_stored(&raw)
    }

    fn compare_and_swap(&self, expected: u64, new: u64) -> Result<bool, StoreError> {
        let Some(_lock) = WriteLock::try_acquire(&self.lock_path)? else {
            return Ok(false);
        };

        if self.read()? != expected {
            return Ok(false);
        }

        write_synced(&self.tmp_path, new)?;
        fs::rename(&self.tmp_path, &self.path)?;
        sync_parent(&self.path)?;
        Ok(true)
    }
}

/// Exclusive right to replace the value file. Closing the handle, or the
/// process dying, releases it.
struct WriteLock {
    _file: File,
}

impl WriteLock {
    fn try_acquire(path: &Path) -> Result<Option<Self>, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        match file.try_lock() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(e.into()),
        }
    }
}

/// Flushes directory metadata so a rename or link into `path`'s directory is durable.
#[cfg(unix)]
fn sync_parent(path: &Path) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()?;
    Ok(())
}

// Directories cannot be opened for syncing here; rename durability is left to the filesystem.
#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn write_synced(path: &Path, value: u64) -> Result<(), StoreError> {
    let mut file = File::create(path)?;
    file.write_all(value.to_string().as_bytes())?;
    file.sync_all()?;
    Ok(())
}
