//! Process-wide default pool.

use std::sync::OnceLock;

use parking_lot::Mutex;
use tinystl_core::malloc::{AllocatorLogRecord, OomHandler, PoolStats};

use crate::pool::PoolAllocator;

/// The default pool, created on first use and never torn down.
///
/// Every `DefaultPool`-backed allocation (including smart-pointer objects
/// and control blocks) goes through this instance.
pub fn default_pool() -> &'static Mutex<PoolAllocator> {
    static POOL: OnceLock<Mutex<PoolAllocator>> = OnceLock::new();
    POOL.get_or_init(|| Mutex::new(PoolAllocator::new()))
}

/// Installs the out-of-memory handler of the default pool's direct path and
/// returns the previous one.
///
/// The handler runs with the default pool locked. It must not allocate
/// through the default pool.
pub fn set_malloc_handler(handler: Option<OomHandler>) -> Option<OomHandler> {
    default_pool().lock().set_malloc_handler(handler)
}

/// Counters of the default pool.
#[must_use]
pub fn default_pool_stats() -> PoolStats {
    default_pool().lock().stats()
}

/// Drains the lifecycle records of the default pool.
pub fn drain_lifecycle_logs() -> Vec<AllocatorLogRecord> {
    default_pool().lock().drain_lifecycle_logs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_default_pool_is_a_singleton() {
        assert!(std::ptr::eq(default_pool(), default_pool()));
    }

    #[test]
    fn test_set_malloc_handler_round_trip() {
        let previous = set_malloc_handler(Some(Arc::new(|| {})));
        let ours = set_malloc_handler(previous);
        assert!(ours.is_some());
    }
}
