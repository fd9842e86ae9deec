mod counter;
mod file;
mod memory;
mod retry;
mod rocksdb;

pub use counter::DurableCounter;
pub use file::FileStore;
pub use memory::MemoryStore;
pub(crate) use retry::env_or;
pub use retry::RetryConfig;
pub use self::rocksdb::{RocksDbStore, DEFAULT_SEQUENCE_KEY};
