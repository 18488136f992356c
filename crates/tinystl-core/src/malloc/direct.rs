//! Direct allocation path.
//!
//! A [`SystemHeap`] hands out whole blocks from the underlying system
//! allocator. It is used for every request above the pooling threshold and
//! as the source of arena memory for the pool. Failures go through an
//! installable out-of-memory handler that is run in a retry loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::size_class::{ALIGN, checked_round_up};
use crate::error::AllocError;

/// Out-of-memory callback.
///
/// The handler is expected to release memory or terminate the process. A
/// handler that does neither makes [`SystemHeap::allocate`] retry forever.
pub type OomHandler = Arc<dyn Fn() + Send + Sync>;

/// Source of whole blocks, addressed as plain `usize` values.
pub trait SystemHeap {
    /// Makes a single attempt to obtain `bytes` bytes, 8-byte aligned.
    ///
    /// Never runs the out-of-memory handler.
    fn try_allocate(&mut self, bytes: usize) -> Option<usize>;

    /// Releases a block previously returned by this heap.
    ///
    /// `bytes` must be the size the block was requested with. Releasing a
    /// foreign or already released block is a precondition violation.
    fn release(&mut self, addr: usize, bytes: usize);

    /// Currently installed out-of-memory handler.
    fn oom_handler(&self) -> Option<OomHandler>;

    /// Installs `handler` and returns the one it replaces.
    fn set_malloc_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler>;

    /// Obtains `bytes` bytes, running the out-of-memory handler and retrying
    /// for as long as the system refuses.
    ///
    /// Fails with [`AllocError::OutOfMemory`] only when no handler is
    /// installed at the moment of a failed attempt.
    fn allocate(&mut self, bytes: usize) -> Result<usize, AllocError> {
        if let Some(addr) = self.try_allocate(bytes) {
            return Ok(addr);
        }
        loop {
            let Some(handler) = self.oom_handler() else {
                return Err(AllocError::OutOfMemory { bytes });
            };
            handler();
            if let Some(addr) = self.try_allocate(bytes) {
                return Ok(addr);
            }
        }
    }
}

/// Deterministic heap with fake addresses and a shared byte budget.
///
/// Addresses start at a high offset and only grow, so a released block is
/// never handed out again. The budget is reachable through
/// [`SimulatedHeap::budget_handle`], which lets an out-of-memory handler
/// "free" memory the way a real one would.
pub struct SimulatedHeap {
    budget: Arc<AtomicUsize>,
    next_base: usize,
    live: HashMap<usize, usize>,
    handler: Option<OomHandler>,
    requests: Vec<usize>,
    failed_attempts: usize,
    releases: usize,
}

impl SimulatedHeap {
    /// Heap that never runs out of memory.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::with_budget(usize::MAX)
    }

    /// Heap that refuses requests once `bytes` bytes are outstanding.
    #[must_use]
    pub fn with_budget(bytes: usize) -> Self {
        Self {
            budget: Arc::new(AtomicUsize::new(bytes)),
            next_base: 0x1_0000_0000, // Start at a high offset to avoid confusion
            live: HashMap::new(),
            handler: None,
            requests: Vec::new(),
            failed_attempts: 0,
            releases: 0,
        }
    }

    /// Shared handle to the remaining budget.
    #[must_use]
    pub fn budget_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.budget)
    }

    /// Bytes that can still be handed out.
    #[must_use]
    pub fn remaining_budget(&self) -> usize {
        self.budget.load(Ordering::Acquire)
    }

    /// Every size passed to `try_allocate`, successful or not, in order.
    #[must_use]
    pub fn requests(&self) -> &[usize] {
        &self.requests
    }

    /// Number of successful attempts.
    #[must_use]
    pub fn successful_allocations(&self) -> usize {
        self.requests.len() - self.failed_attempts
    }

    /// Number of refused attempts.
    #[must_use]
    pub fn failed_attempts(&self) -> usize {
        self.failed_attempts
    }

    /// Number of released blocks.
    #[must_use]
    pub fn releases(&self) -> usize {
        self.releases
    }

    /// Number of blocks currently handed out.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.live.len()
    }

    /// Returns true if `addr` is the base of a block currently handed out.
    #[must_use]
    pub fn is_live(&self, addr: usize) -> bool {
        self.live.contains_key(&addr)
    }

    /// Total bytes currently handed out.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live.values().sum()
    }

    fn charge(&self, bytes: usize) -> bool {
        self.budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| b.checked_sub(bytes))
            .is_ok()
    }
}

impl SystemHeap for SimulatedHeap {
    fn try_allocate(&mut self, bytes: usize) -> Option<usize> {
        self.requests.push(bytes);
        // Keep a gap between blocks so adjacent blocks never look contiguous.
        let placed = checked_round_up(bytes.max(1)).and_then(|span| {
            let next = self.next_base.checked_add(span)?.checked_add(ALIGN)?;
            Some((span, next))
        });
        let Some((span, next)) = placed.filter(|&(span, _)| self.charge(span)) else {
            self.failed_attempts += 1;
            return None;
        };
        let base = self.next_base;
        self.next_base = next;
        self.live.insert(base, span);
        Some(base)
    }

    fn release(&mut self, addr: usize, _bytes: usize) {
        let Some(span) = self.live.remove(&addr) else {
            panic!("simulated heap: release of unknown block {addr:#x}");
        };
        self.budget.fetch_add(span, Ordering::AcqRel);
        self.releases += 1;
    }

    fn oom_handler(&self) -> Option<OomHandler> {
        self.handler.clone()
    }

    fn set_malloc_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler> {
        std::mem::replace(&mut self.handler, handler)
    }
}

impl Default for SimulatedHeap {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl fmt::Debug for SimulatedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedHeap")
            .field("remaining_budget", &self.remaining_budget())
            .field("live_blocks", &self.live.len())
            .field("requests", &self.requests.len())
            .field("failed_attempts", &self.failed_attempts)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrepresentable_request_is_refused() {
        let mut heap = SimulatedHeap::unlimited();
        assert_eq!(heap.try_allocate(usize::MAX), None);
        assert_eq!(heap.try_allocate(usize::MAX - 3), None);
        assert_eq!(heap.failed_attempts(), 2);
        assert_eq!(heap.remaining_budget(), usize::MAX);
        assert_eq!(
            heap.allocate(usize::MAX),
            Err(AllocError::OutOfMemory { bytes: usize::MAX })
        );
        assert!(heap.try_allocate(64).is_some());
    }

    #[test]
    fn test_addresses_are_aligned_and_distinct() {
        let mut heap = SimulatedHeap::unlimited();
        let a = heap.try_allocate(1).unwrap();
        let b = heap.try_allocate(300).unwrap();
        assert_eq!(a % ALIGN, 0);
        assert_eq!(b % ALIGN, 0);
        assert!(b >= a + 8);
        assert_eq!(heap.live_blocks(), 2);
        assert_eq!(heap.live_bytes(), 8 + 304);
    }

    #[test]
    fn test_budget_is_enforced_and_restored() {
        let mut heap = SimulatedHeap::with_budget(64);
        let a = heap.try_allocate(64).unwrap();
        assert!(heap.try_allocate(8).is_none());
        assert_eq!(heap.failed_attempts(), 1);

        heap.release(a, 64);
        assert_eq!(heap.remaining_budget(), 64);
        assert!(heap.try_allocate(8).is_some());
        assert_eq!(heap.releases(), 1);
    }

    #[test]
    fn test_allocate_without_handler_is_oom() {
        let mut heap = SimulatedHeap::with_budget(0);
        assert_eq!(
            heap.allocate(256),
            Err(AllocError::OutOfMemory { bytes: 256 })
        );
    }

    #[test]
    fn test_handler_runs_until_memory_appears() {
        let mut heap = SimulatedHeap::with_budget(0);
        let budget = heap.budget_handle();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        heap.set_malloc_handler(Some(Arc::new(move || {
            // Release memory on the third invocation.
            if seen.fetch_add(1, Ordering::SeqCst) == 2 {
                budget.store(1024, Ordering::SeqCst);
            }
        })));

        let addr = heap.allocate(512).unwrap();
        assert!(heap.is_live(addr));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(heap.failed_attempts(), 3);
    }

    #[test]
    fn test_set_handler_returns_previous() {
        let mut heap = SimulatedHeap::unlimited();
        assert!(heap.set_malloc_handler(Some(Arc::new(|| {}))).is_none());
        let previous = heap.set_malloc_handler(None);
        assert!(previous.is_some());
        assert!(heap.oom_handler().is_none());
    }

    #[test]
    #[should_panic(expected = "unknown block")]
    fn test_release_unknown_block_panics() {
        let mut heap = SimulatedHeap::unlimited();
        heap.release(0xDEAD_0000, 8);
    }
}
