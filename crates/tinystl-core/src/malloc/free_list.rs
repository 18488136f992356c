//! Per-size-class free lists.
//!
//! Each class keeps a LIFO stack of free block addresses. The most recently
//! freed block is the next one handed out, which is the order a singly
//! linked intrusive list would produce, without writing link words into the
//! freed memory.

use super::size_class::NUM_FREE_LISTS;

/// Stack of free block addresses for one size class.
#[derive(Debug, Clone, Default)]
struct FreeList {
    blocks: Vec<usize>,
}

impl FreeList {
    fn pop(&mut self) -> Option<usize> {
        self.blocks.pop()
    }

    fn push(&mut self, addr: usize) {
        self.blocks.push(addr);
    }

    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn contains(&self, addr: usize) -> bool {
        self.blocks.contains(&addr)
    }

    fn drain(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.blocks)
    }
}

/// The full table of size-class free lists.
#[derive(Debug, Clone)]
pub struct FreeLists {
    lists: Vec<FreeList>,
    /// Total number of free blocks across all classes.
    total_free: usize,
}

impl FreeLists {
    /// Creates a table of empty lists.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pops the head of list `index`.
    ///
    /// Returns `None` if the list is empty or `index` is out of range.
    pub fn pop(&mut self, index: usize) -> Option<usize> {
        if index >= NUM_FREE_LISTS {
            return None;
        }
        let result = self.lists[index].pop();
        if result.is_some() {
            self.total_free -= 1;
        }
        result
    }

    /// Pushes `addr` as the new head of list `index`.
    ///
    /// Returns `false` (and drops nothing) if `index` is out of range.
    pub fn push(&mut self, index: usize, addr: usize) -> bool {
        if index >= NUM_FREE_LISTS {
            return false;
        }
        self.lists[index].push(addr);
        self.total_free += 1;
        true
    }

    /// Number of free blocks on list `index`.
    #[must_use]
    pub fn len(&self, index: usize) -> usize {
        self.lists.get(index).map_or(0, FreeList::len)
    }

    /// Returns true if list `index` has no free blocks.
    #[must_use]
    pub fn is_empty(&self, index: usize) -> bool {
        self.len(index) == 0
    }

    /// Returns true if `addr` is currently queued on list `index`.
    ///
    /// Linear in the list length; used by hardened checks only.
    #[must_use]
    pub fn contains(&self, index: usize, addr: usize) -> bool {
        self.lists.get(index).is_some_and(|list| list.contains(addr))
    }

    /// Total number of free blocks across all lists.
    #[must_use]
    pub fn total_free(&self) -> usize {
        self.total_free
    }

    /// Removes and returns every block on list `index`.
    pub fn drain(&mut self, index: usize) -> Vec<usize> {
        if index >= NUM_FREE_LISTS {
            return Vec::new();
        }
        let drained = self.lists[index].drain();
        self.total_free -= drained.len();
        drained
    }
}

impl Default for FreeLists {
    fn default() -> Self {
        Self {
            lists: vec![FreeList::default(); NUM_FREE_LISTS],
            total_free: 0,
        }
    }
}
