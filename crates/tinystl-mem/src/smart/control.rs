//! Reference-counted control block shared by `SharedPtr` and `WeakPtr`.
//!
//! A block holds the strong count, the weak count and the deleter paired
//! with the managed pointer. While any strong reference exists, the strong
//! group holds one extra weak reference, so a new block starts at
//! strong 1 / weak 1. Teardown happens in two phases:
//!
//! 1. strong reaches 0: the deleter runs on the managed pointer, then the
//!    strong group's weak reference is dropped;
//! 2. weak reaches 0: the deleter value is dropped and the block's storage
//!    goes back to the default pool.
//!
//! Blocks are allocated from the default pool with the deleter stored
//! inline, then erased to `ControlBlock<dyn Dispose>`.

use std::alloc::Layout;
use std::any::Any;
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering, fence};

use tinystl_core::error::AllocError;

use super::deleter::Deleter;
use crate::typed::{DefaultPool, allocate_layout, deallocate_layout};

/// Counts above this abort the process instead of risking wrap-around.
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// Type-erased view of the managed pointer and its deleter.
pub(crate) trait Dispose {
    /// Runs the deleter on the managed pointer.
    ///
    /// # Safety
    ///
    /// Called once, by the thread that dropped the strong count to zero.
    unsafe fn dispose(&mut self);

    /// The deleter, for `get_deleter` lookups.
    fn deleter(&self) -> &dyn Any;
}

struct Managed<T: ?Sized, D> {
    ptr: NonNull<T>,
    deleter: D,
}

impl<T: ?Sized, D: Deleter<T> + 'static> Dispose for Managed<T, D> {
    unsafe fn dispose(&mut self) {
        // SAFETY: the managed object is still alive and this is the only
        // call for it.
        unsafe { self.deleter.delete(self.ptr) }
    }

    fn deleter(&self) -> &dyn Any {
        &self.deleter
    }
}

pub(crate) struct ControlBlock<M: ?Sized> {
    strong: AtomicUsize,
    weak: AtomicUsize,
    managed: UnsafeCell<M>,
}

/// The form every smart pointer stores.
pub(crate) type ErasedBlock = ControlBlock<dyn Dispose>;

/// Allocates a block owning `ptr` with strong 1 / weak 1.
///
/// On allocation failure `ptr` is handed to `deleter` before the error is
/// returned, so the object never leaks.
///
/// # Safety
///
/// `ptr` must be a live object that `deleter` can dispose of, not owned by
/// anything else.
pub(crate) unsafe fn allocate_block<T, D>(
    ptr: NonNull<T>,
    mut deleter: D,
) -> Result<NonNull<ErasedBlock>, AllocError>
where
    T: ?Sized + 'static,
    D: Deleter<T> + 'static,
{
    let layout = Layout::new::<ControlBlock<Managed<T, D>>>();
    let storage = match allocate_layout(&DefaultPool, layout) {
        Ok(storage) => storage.cast::<ControlBlock<Managed<T, D>>>(),
        Err(err) => {
            // SAFETY: caller contract; the object is still exclusively ours.
            unsafe { deleter.delete(ptr) };
            return Err(err);
        }
    };
    // SAFETY: fresh storage with the block's layout.
    unsafe {
        storage.as_ptr().write(ControlBlock {
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            managed: UnsafeCell::new(Managed { ptr, deleter }),
        });
    }
    let erased: NonNull<ErasedBlock> = storage;
    Ok(erased)
}

impl<M: ?Sized> ControlBlock<M> {
    pub(crate) fn strong_count(&self) -> usize {
        self.strong.load(Ordering::Acquire)
    }

    pub(crate) fn increment_strong(&self) {
        // Relaxed: the caller already holds a strong reference.
        let old = self.strong.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            std::process::abort();
        }
    }

    pub(crate) fn increment_weak(&self) {
        let old = self.weak.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            std::process::abort();
        }
    }

    /// Adds a strong reference unless the count already reached zero.
    ///
    /// A single compare-and-swap decides, so an object can never be revived
    /// after its deleter has been scheduled.
    pub(crate) fn try_increment_strong(&self) -> bool {
        let mut current = self.strong.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            if current > MAX_REFCOUNT {
                std::process::abort();
            }
            match self.strong.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl ErasedBlock {
    /// The deleter as `&dyn Any`.
    ///
    /// # Safety
    ///
    /// The caller must hold a strong reference.
    pub(crate) unsafe fn deleter(&self) -> &dyn Any {
        // SAFETY: `dispose` only runs once no strong reference remains, so
        // no `&mut` to the managed part can exist concurrently.
        unsafe { (*self.managed.get()).deleter() }
    }
}

/// Drops one strong reference, running the deleter on the last one.
///
/// # Safety
///
/// The caller must own a strong reference to `cb` and give it up.
pub(crate) unsafe fn release_strong(cb: NonNull<ErasedBlock>) {
    // SAFETY: the caller's strong reference keeps the block alive.
    let block = unsafe { cb.as_ref() };
    if block.strong.fetch_sub(1, Ordering::Release) != 1 {
        return;
    }
    fence(Ordering::Acquire);
    // SAFETY: we took the count to zero, so no other thread touches the
    // managed part until the block is freed.
    unsafe { (*block.managed.get()).dispose() };
    // SAFETY: the strong group's weak reference.
    unsafe { release_weak(cb) };
}

/// Drops one weak reference, freeing the block on the last one.
///
/// # Safety
///
/// The caller must own a weak reference to `cb` and give it up.
pub(crate) unsafe fn release_weak(cb: NonNull<ErasedBlock>) {
    // SAFETY: the caller's weak reference keeps the block alive.
    let block = unsafe { cb.as_ref() };
    if block.weak.fetch_sub(1, Ordering::Release) != 1 {
        return;
    }
    fence(Ordering::Acquire);
    let layout = Layout::for_value(block);
    // SAFETY: last reference; the block was written by `allocate_block`
    // with this layout.
    unsafe {
        std::ptr::drop_in_place(cb.as_ptr());
        deallocate_layout(&DefaultPool, cb.cast::<u8>(), layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smart::deleter::deleter_fn;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn flagged_block(flag: &Arc<AtomicBool>) -> NonNull<ErasedBlock> {
        let deleted = Arc::clone(flag);
        let boxed = NonNull::from(Box::leak(Box::new(7u32)));
        let deleter = deleter_fn(move |p: NonNull<u32>| {
            // SAFETY: `p` is the leaked box, reclaimed once.
            drop(unsafe { Box::from_raw(p.as_ptr()) });
            deleted.store(true, Ordering::SeqCst);
        });
        // SAFETY: the deleter reclaims `boxed`.
        unsafe { allocate_block(boxed, deleter).unwrap() }
    }

    #[test]
    fn test_new_block_counts() {
        let flag = Arc::new(AtomicBool::new(false));
        let cb = flagged_block(&flag);
        // SAFETY: we own the initial strong reference.
        unsafe {
            assert_eq!(cb.as_ref().strong_count(), 1);
            assert_eq!(cb.as_ref().weak.load(Ordering::SeqCst), 1);
            release_strong(cb);
        }
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_weak_reference_outlives_object() {
        let flag = Arc::new(AtomicBool::new(false));
        let cb = flagged_block(&flag);
        // SAFETY: references are balanced below.
        unsafe {
            cb.as_ref().increment_weak();
            release_strong(cb);
            assert!(flag.load(Ordering::SeqCst));
            assert_eq!(cb.as_ref().strong_count(), 0);
            assert!(!cb.as_ref().try_increment_strong());
            release_weak(cb);
        }
    }

    #[test]
    fn test_try_increment_strong_while_alive() {
        let flag = Arc::new(AtomicBool::new(false));
        let cb = flagged_block(&flag);
        // SAFETY: references are balanced below.
        unsafe {
            assert!(cb.as_ref().try_increment_strong());
            assert_eq!(cb.as_ref().strong_count(), 2);
            release_strong(cb);
            assert!(!flag.load(Ordering::SeqCst));
            release_strong(cb);
        }
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_deleter_lookup_by_type() {
        let flag = Arc::new(AtomicBool::new(false));
        let cb = flagged_block(&flag);
        // SAFETY: strong reference held until `release_strong`.
        unsafe {
            assert!(cb.as_ref().deleter().downcast_ref::<u32>().is_none());
            release_strong(cb);
        }
    }
}
