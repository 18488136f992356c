//! Pooled allocator over real memory.
//!
//! [`PoolAllocator`] runs the [`PoolState`] policy with a [`DirectAllocator`]
//! underneath and converts between block addresses and pointers.

use std::ptr::NonNull;

use tinystl_core::config::{PoolConfig, SafetyLevel};
use tinystl_core::error::AllocError;
use tinystl_core::malloc::{AllocatorLogRecord, OomHandler, PoolState, PoolStats};

use crate::direct::DirectAllocator;

/// Free-list allocator for small blocks, falling back to `malloc` above 128
/// bytes.
///
/// Not thread-safe by itself. Share it behind a lock, as
/// [`default_pool`](crate::global::default_pool) does.
#[derive(Debug)]
pub struct PoolAllocator {
    state: PoolState<DirectAllocator>,
}

impl PoolAllocator {
    /// Pool configured from `TINYSTL_MODE`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Pool with an explicit configuration.
    #[must_use]
    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            state: PoolState::with_config(DirectAllocator::new(), config),
        }
    }

    /// Allocates `bytes` bytes of uninitialized, 8-byte aligned memory.
    pub fn allocate(&mut self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        let addr = self.state.allocate(bytes)?;
        let ptr = std::ptr::with_exposed_provenance_mut::<u8>(addr);
        NonNull::new(ptr).ok_or(AllocError::OutOfMemory { bytes })
    }

    /// Returns a block to the pool.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`allocate`](Self::allocate) on this pool with a
    /// size in the same class as `bytes` (the exact size above 128 bytes),
    /// and must not be used afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize) {
        self.state.deallocate(ptr.as_ptr().expose_provenance(), bytes);
    }

    /// Installs the out-of-memory handler and returns the previous one.
    ///
    /// The handler runs while the pool is borrowed, so it must not allocate
    /// from this pool.
    pub fn set_malloc_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler> {
        self.state.set_malloc_handler(handler)
    }

    /// Snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.state.stats()
    }

    /// Checking level of this pool.
    #[must_use]
    pub fn level(&self) -> SafetyLevel {
        self.state.level()
    }

    /// Number of free blocks queued on list `idx`.
    #[must_use]
    pub fn free_count(&self, idx: usize) -> usize {
        self.state.free_count(idx)
    }

    /// Removes and returns every retained lifecycle record.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        self.state.drain_lifecycle_logs()
    }
}

impl Default for PoolAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinystl_core::malloc::size_class::free_list_index;

    fn strict() -> PoolAllocator {
        PoolAllocator::with_config(PoolConfig::with_level(SafetyLevel::Strict))
    }

    #[test]
    fn test_blocks_are_writable_and_aligned() {
        let mut pool = strict();
        let mut blocks = Vec::new();
        for n in [1usize, 7, 8, 24, 100, 128, 129, 4096] {
            let ptr = pool.allocate(n).unwrap();
            assert_eq!(ptr.as_ptr().addr() % 8, 0);
            // SAFETY: `n` bytes were just allocated.
            unsafe { ptr.as_ptr().write_bytes(n as u8, n) };
            blocks.push((ptr, n));
        }
        for &(ptr, n) in &blocks {
            // SAFETY: still live, filled above.
            let last = unsafe { *ptr.as_ptr().add(n - 1) };
            assert_eq!(last, n as u8);
        }
        for (ptr, n) in blocks {
            // SAFETY: allocated above with the same size.
            unsafe { pool.deallocate(ptr, n) };
        }
        let stats = pool.stats();
        assert_eq!(stats.live_total(), 0);
        assert_eq!(stats.direct_allocations, 2);
        assert_eq!(stats.direct_deallocations, 2);
    }

    #[test]
    fn test_reuse_after_free() {
        let mut pool = strict();
        let a = pool.allocate(16).unwrap();
        let _b = pool.allocate(16).unwrap();
        // SAFETY: `a` came from this pool with the same size.
        unsafe { pool.deallocate(a, 16) };
        assert_eq!(pool.allocate(16).unwrap(), a);
        assert_eq!(pool.free_count(free_list_index(16)), 18);
    }

    #[test]
    fn test_logs_drain() {
        let mut pool = strict();
        pool.allocate(8).unwrap();
        assert!(!pool.drain_lifecycle_logs().is_empty());
        assert!(pool.drain_lifecycle_logs().is_empty());
    }
}
