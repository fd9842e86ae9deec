pub mod error;
pub mod sequence;
pub mod store;

pub use error::{LockResultExt, SequenceError, StoreError};
pub use sequence::{CounterSource, SequenceGenerator};
pub use store::DurableStore;
