//! Two-tier allocation policy.
//!
//! - Small requests (<=128 bytes): rounded up to one of 16 size classes and
//!   served from per-class free lists, refilled in batches carved from a
//!   growable arena.
//! - Large requests (>128 bytes): delegated to the direct allocation path of
//!   the [`SystemHeap`], including its out-of-memory handler loop.

pub mod direct;
pub mod free_list;
pub mod lifecycle;
pub mod pool;
pub mod size_class;

pub use direct::{OomHandler, SimulatedHeap, SystemHeap};
pub use free_list::FreeLists;
pub use lifecycle::{AllocatorLogLevel, AllocatorLogRecord, LifecycleLog};
pub use pool::{PoolState, PoolStats};
pub use size_class::{ALIGN, MAX_BYTES, NUM_FREE_LISTS, REFILL_BATCH};
