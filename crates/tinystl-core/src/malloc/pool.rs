//! Pooled allocator state.
//!
//! Central policy for small allocations. Requests of at most
//! [`MAX_BYTES`] bytes are rounded to a size class and served from that
//! class's free list; an empty list is refilled with a batch of blocks carved
//! from the current arena, and the arena grows through the [`SystemHeap`]
//! when it runs dry. Larger requests go straight to the heap's direct path.
//!
//! Blocks are plain addresses. This layer never reads or writes the memory
//! it manages.

use std::collections::HashMap;

use serde::Serialize;

use super::direct::{OomHandler, SystemHeap};
use super::free_list::FreeLists;
use super::lifecycle::{AllocatorLogLevel, AllocatorLogRecord, LifecycleLog, LogEvent, LogSnapshot};
use super::size_class::{
    ALIGN, MAX_BYTES, NUM_FREE_LISTS, class_size, free_list_index, is_large, round_up,
};
use crate::config::{PoolConfig, SafetyLevel};
use crate::error::AllocError;

/// Counters kept by every pool instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Cumulative bytes obtained from the heap for arenas.
    pub heap_size: usize,
    /// Number of arenas obtained from the heap.
    pub arena_growths: usize,
    /// Small allocations served straight from a free list.
    pub free_list_hits: usize,
    /// Batch refills of an empty free list.
    pub refills: usize,
    /// Free blocks taken back from a class list to serve as arena space.
    pub scavenges: usize,
    /// Requests above the pooling threshold sent to the direct path.
    pub direct_allocations: usize,
    /// Releases sent to the direct path.
    pub direct_deallocations: usize,
    /// Blocks owned by each class, live or free.
    ///
    /// Grows with every carve. Shrinks only when a free block is scavenged
    /// back into the arena.
    pub carved: [usize; NUM_FREE_LISTS],
    /// Blocks of each class currently handed out.
    pub live: [usize; NUM_FREE_LISTS],
}

impl PoolStats {
    /// Small blocks currently handed out, over all classes.
    #[must_use]
    pub fn live_total(&self) -> usize {
        self.live.iter().sum()
    }

    /// Blocks owned by all classes.
    #[must_use]
    pub fn carved_total(&self) -> usize {
        self.carved.iter().sum()
    }
}

/// Free-list pool over a [`SystemHeap`].
///
/// Single-threaded; callers sharing an instance must serialize access.
pub struct PoolState<H: SystemHeap> {
    heap: H,
    config: PoolConfig,
    free_lists: FreeLists,
    /// Current arena `[arena_start, arena_end)`.
    arena_start: usize,
    arena_end: usize,
    /// Arenas obtained from the heap as `(base, bytes)`, released on drop.
    arenas: Vec<(usize, usize)>,
    stats: PoolStats,
    /// Hardened mode only: live block address -> block size.
    tracked: HashMap<usize, usize>,
    log: LifecycleLog,
}

impl<H: SystemHeap> PoolState<H> {
    /// Creates a pool over `heap` with the environment-derived config.
    pub fn new(heap: H) -> Self {
        Self::with_config(heap, PoolConfig::default())
    }

    /// Creates a pool over `heap` with an explicit config.
    ///
    /// `config.refill_batch` is clamped to `1..=MAX_REFILL_BATCH`.
    pub fn with_config(heap: H, config: PoolConfig) -> Self {
        let config = config.normalized();
        Self {
            heap,
            config,
            free_lists: FreeLists::new(),
            arena_start: 0,
            arena_end: 0,
            arenas: Vec::new(),
            stats: PoolStats::default(),
            tracked: HashMap::new(),
            log: LifecycleLog::new(config.log_capacity, config.level.logging_enabled()),
        }
    }

    fn snapshot(&self) -> LogSnapshot {
        LogSnapshot {
            live_blocks: self.stats.live_total(),
            free_blocks: self.free_lists.total_free(),
            arena_remaining: self.arena_remaining(),
            heap_size: self.stats.heap_size,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_lifecycle(
        &mut self,
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        addr: Option<usize>,
        size: Option<usize>,
        class: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        let snapshot = self.snapshot();
        self.log.record(
            LogEvent {
                level,
                symbol,
                event,
                addr,
                size,
                class,
                outcome,
                details: details.into(),
            },
            snapshot,
        );
    }

    /// Allocates `n` bytes.
    ///
    /// Small requests are 8-byte aligned and come from the free lists. A
    /// zero-byte request is served as a one-byte request.
    pub fn allocate(&mut self, n: usize) -> Result<usize, AllocError> {
        let n = n.max(1);

        if is_large(n) {
            return self.allocate_direct(n);
        }

        let idx = free_list_index(n);
        if let Some(addr) = self.free_lists.pop(idx) {
            self.stats.free_list_hits += 1;
            self.mark_live(addr, idx);
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "allocate",
                "alloc",
                Some(addr),
                Some(n),
                Some(idx),
                "success",
                "path=free_list_hit",
            );
            return Ok(addr);
        }

        let addr = self.refill(round_up(n))?;
        self.mark_live(addr, idx);
        self.record_lifecycle(
            AllocatorLogLevel::Trace,
            "allocate",
            "alloc",
            Some(addr),
            Some(n),
            Some(idx),
            "success",
            "path=refill",
        );
        Ok(addr)
    }

    fn allocate_direct(&mut self, n: usize) -> Result<usize, AllocError> {
        match self.heap.allocate(n) {
            Ok(addr) => {
                self.stats.direct_allocations += 1;
                if self.config.level.checks_enabled() {
                    self.tracked.insert(addr, n);
                }
                self.record_lifecycle(
                    AllocatorLogLevel::Trace,
                    "allocate",
                    "alloc",
                    Some(addr),
                    Some(n),
                    Some(NUM_FREE_LISTS),
                    "success",
                    "path=direct",
                );
                Ok(addr)
            }
            Err(err) => {
                self.record_lifecycle(
                    AllocatorLogLevel::Error,
                    "allocate",
                    "alloc",
                    None,
                    Some(n),
                    Some(NUM_FREE_LISTS),
                    "oom",
                    "path=direct no_handler",
                );
                Err(err)
            }
        }
    }

    fn mark_live(&mut self, addr: usize, idx: usize) {
        self.stats.live[idx] += 1;
        if self.config.level.checks_enabled() {
            self.tracked.insert(addr, class_size(idx));
        }
    }

    /// Returns a block obtained from [`allocate`](Self::allocate).
    ///
    /// `n` must be the size the block was allocated with (any size mapping
    /// to the same class is accepted). Address 0 is a no-op. In strict mode
    /// a mismatched size, a foreign address, or a double free corrupts the
    /// free lists; in hardened mode each of them panics.
    pub fn deallocate(&mut self, addr: usize, n: usize) {
        if addr == 0 {
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "deallocate",
                "free_null",
                Some(addr),
                Some(n),
                None,
                "noop",
                "null_address",
            );
            return;
        }
        let n = n.max(1);

        if is_large(n) {
            if self.config.level.checks_enabled() {
                self.check_release(addr, n, NUM_FREE_LISTS);
            }
            self.heap.release(addr, n);
            self.stats.direct_deallocations += 1;
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "deallocate",
                "free",
                Some(addr),
                Some(n),
                Some(NUM_FREE_LISTS),
                "success",
                "path=direct",
            );
            return;
        }

        let idx = free_list_index(n);
        if self.config.level.checks_enabled() {
            self.check_release(addr, class_size(idx), idx);
        }
        match self.stats.live[idx].checked_sub(1) {
            Some(next) => self.stats.live[idx] = next,
            None => {
                self.record_lifecycle(
                    AllocatorLogLevel::Error,
                    "deallocate",
                    "invariant_live_underflow",
                    Some(addr),
                    Some(n),
                    Some(idx),
                    "recovered",
                    "checked_sub_failed",
                );
            }
        }
        self.free_lists.push(idx, addr);
        self.record_lifecycle(
            AllocatorLogLevel::Trace,
            "deallocate",
            "free",
            Some(addr),
            Some(n),
            Some(idx),
            "success",
            format!("free_list_len={}", self.free_lists.len(idx)),
        );
    }

    /// Hardened-mode validation of a release. Panics on violation.
    fn check_release(&mut self, addr: usize, bytes: usize, idx: usize) {
        match self.tracked.remove(&addr) {
            Some(recorded) if recorded == bytes => {}
            Some(recorded) => {
                self.tracked.insert(addr, recorded);
                self.record_lifecycle(
                    AllocatorLogLevel::Error,
                    "deallocate",
                    "size_mismatch",
                    Some(addr),
                    Some(bytes),
                    Some(idx),
                    "aborted",
                    format!("allocated_bytes={recorded}"),
                );
                panic!(
                    "tinystl pool: size mismatch for {addr:#x}: allocated as {recorded} bytes, freed as {bytes}"
                );
            }
            None => {
                let double_free =
                    (0..NUM_FREE_LISTS).any(|class| self.free_lists.contains(class, addr));
                let event = if double_free {
                    "double_free_detected"
                } else {
                    "foreign_address"
                };
                self.record_lifecycle(
                    AllocatorLogLevel::Error,
                    "deallocate",
                    event,
                    Some(addr),
                    Some(bytes),
                    Some(idx),
                    "aborted",
                    "address_not_live",
                );
                if double_free {
                    panic!("tinystl pool: double free of {addr:#x}");
                }
                panic!("tinystl pool: deallocate of foreign address {addr:#x}");
            }
        }
    }

    /// Refills the list for blocks of `size` bytes and returns one block.
    ///
    /// `size` must already be a multiple of [`ALIGN`]. The remaining blocks
    /// are queued so that the next allocation returns the block right after
    /// the one returned here.
    fn refill(&mut self, size: usize) -> Result<usize, AllocError> {
        let batch = self.config.refill_batch;
        let (start, objs) = self.chunk_alloc(size, batch)?;
        let idx = free_list_index(size);

        self.stats.refills += 1;
        self.stats.carved[idx] += objs;
        for i in (1..objs).rev() {
            self.free_lists.push(idx, start + i * size);
        }
        self.record_lifecycle(
            AllocatorLogLevel::Debug,
            "refill",
            "refill",
            Some(start),
            Some(size),
            Some(idx),
            if objs == batch { "full_batch" } else { "partial_batch" },
            format!("objs={objs} requested={batch}"),
        );
        Ok(start)
    }

    /// Carves up to `nobjs` blocks of `size` bytes from the arena.
    ///
    /// Returns the first block and the number of blocks carved, at least one.
    fn chunk_alloc(&mut self, size: usize, nobjs: usize) -> Result<(usize, usize), AllocError> {
        let total = size
            .checked_mul(nobjs)
            .ok_or(AllocError::CapacityOverflow {
                count: nobjs,
                elem_size: size,
            })?;
        loop {
            let left = self.arena_remaining();

            if left >= total {
                let start = self.arena_start;
                self.arena_start += total;
                return Ok((start, nobjs));
            }

            if left >= size {
                let objs = left / size;
                let start = self.arena_start;
                self.arena_start += objs * size;
                self.record_lifecycle(
                    AllocatorLogLevel::Debug,
                    "chunk_alloc",
                    "arena_partial",
                    Some(start),
                    Some(size),
                    Some(free_list_index(size)),
                    "partial",
                    format!("objs={objs} left={left}"),
                );
                return Ok((start, objs));
            }

            let bytes_to_get = growth_request(total, self.stats.heap_size);

            if left > 0 {
                self.retire_arena_tail(left);
            }
            self.arena_start = 0;
            self.arena_end = 0;

            if let Some(bytes) = bytes_to_get {
                if let Some(addr) = self.heap.try_allocate(bytes) {
                    self.install_arena(addr, bytes, "path=system");
                    continue;
                }
            }

            if self.scavenge(size) {
                continue;
            }

            let Some(bytes_to_get) = bytes_to_get else {
                self.record_lifecycle(
                    AllocatorLogLevel::Error,
                    "chunk_alloc",
                    "arena_grow",
                    None,
                    Some(total),
                    None,
                    "oom",
                    "growth_size_overflow",
                );
                return Err(AllocError::OutOfMemory { bytes: usize::MAX });
            };
            self.record_lifecycle(
                AllocatorLogLevel::Warn,
                "chunk_alloc",
                "arena_grow_fallback",
                None,
                Some(bytes_to_get),
                None,
                "retrying",
                "path=direct_with_handler",
            );
            match self.heap.allocate(bytes_to_get) {
                Ok(addr) => self.install_arena(addr, bytes_to_get, "path=direct_with_handler"),
                Err(err) => {
                    self.record_lifecycle(
                        AllocatorLogLevel::Error,
                        "chunk_alloc",
                        "arena_grow",
                        None,
                        Some(bytes_to_get),
                        None,
                        "oom",
                        "no_handler",
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Queues the unusable tail of the current arena on its class list.
    fn retire_arena_tail(&mut self, left: usize) {
        let idx = free_list_index(left);
        let addr = self.arena_start;
        self.free_lists.push(idx, addr);
        self.stats.carved[idx] += 1;
        self.record_lifecycle(
            AllocatorLogLevel::Debug,
            "chunk_alloc",
            "arena_tail",
            Some(addr),
            Some(left),
            Some(idx),
            "queued",
            "leftover_bytes_to_free_list",
        );
    }

    fn install_arena(&mut self, addr: usize, bytes: usize, path: &'static str) {
        self.arena_start = addr;
        self.arena_end = addr + bytes;
        self.arenas.push((addr, bytes));
        self.stats.heap_size = self.stats.heap_size.saturating_add(bytes);
        self.stats.arena_growths += 1;
        self.record_lifecycle(
            AllocatorLogLevel::Info,
            "chunk_alloc",
            "arena_grow",
            Some(addr),
            Some(bytes),
            None,
            "success",
            path,
        );
    }

    /// Takes a free block of at least `size` bytes as the new arena.
    fn scavenge(&mut self, size: usize) -> bool {
        for block in (size..=MAX_BYTES).step_by(ALIGN) {
            let idx = free_list_index(block);
            if let Some(addr) = self.free_lists.pop(idx) {
                self.stats.carved[idx] -= 1;
                self.stats.scavenges += 1;
                self.arena_start = addr;
                self.arena_end = addr + block;
                self.record_lifecycle(
                    AllocatorLogLevel::Warn,
                    "chunk_alloc",
                    "scavenge",
                    Some(addr),
                    Some(block),
                    Some(idx),
                    "success",
                    format!("requested_size={size}"),
                );
                return true;
            }
        }
        false
    }

    /// Installs a new out-of-memory handler on the heap and returns the old one.
    pub fn set_malloc_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler> {
        self.heap.set_malloc_handler(handler)
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Number of free blocks queued on list `idx`.
    #[must_use]
    pub fn free_count(&self, idx: usize) -> usize {
        self.free_lists.len(idx)
    }

    /// Bytes left in the current arena.
    #[must_use]
    pub fn arena_remaining(&self) -> usize {
        self.arena_end - self.arena_start
    }

    /// Checking level of this instance.
    #[must_use]
    pub fn level(&self) -> SafetyLevel {
        self.config.level
    }

    /// The backing heap.
    #[must_use]
    pub fn heap(&self) -> &H {
        &self.heap
    }

    /// Mutable access to the backing heap.
    pub fn heap_mut(&mut self) -> &mut H {
        &mut self.heap
    }

    /// Currently retained lifecycle records, oldest first.
    pub fn lifecycle_logs(&self) -> impl ExactSizeIterator<Item = &AllocatorLogRecord> {
        self.log.records()
    }

    /// Removes and returns every retained lifecycle record.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        self.log.drain()
    }
}

/// Arena size requested when the current arena cannot supply one block:
/// twice the batch plus a sixteenth of everything obtained so far.
fn growth_request(total: usize, heap_size: usize) -> Option<usize> {
    total.checked_mul(2)?.checked_add(round_up(heap_size >> 4))
}

impl<H: SystemHeap + Default> Default for PoolState<H> {
    fn default() -> Self {
        Self::new(H::default())
    }
}

impl<H: SystemHeap> Drop for PoolState<H> {
    /// Returns every arena to the heap. Blocks still held by callers become
    /// dangling.
    fn drop(&mut self) {
        for (addr, bytes) in self.arenas.drain(..) {
            self.heap.release(addr, bytes);
        }
    }
}

impl<H: SystemHeap> std::fmt::Debug for PoolState<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolState")
            .field("level", &self.config.level)
            .field("arena_remaining", &self.arena_remaining())
            .field("free_blocks", &self.free_lists.total_free())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
