//! Allocation metrics.
//!
//! Counters are plain atomics so recording them never contends with the
//! allocator lock.

pub mod histogram;
pub mod registry;

pub use histogram::Histogram;
pub use registry::SequenceMetrics;
