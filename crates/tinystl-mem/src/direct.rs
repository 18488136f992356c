//! Direct allocator over the C heap.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use tinystl_core::malloc::{OomHandler, SystemHeap};

/// Thin wrapper over `malloc`/`free` with an out-of-memory handler.
///
/// Implements [`SystemHeap`], so the handler retry loop lives in
/// [`SystemHeap::allocate`].
#[derive(Default)]
pub struct DirectAllocator {
    handler: Option<OomHandler>,
}

impl DirectAllocator {
    /// Allocator with no out-of-memory handler.
    #[must_use]
    pub const fn new() -> Self {
        Self { handler: None }
    }
}

impl SystemHeap for DirectAllocator {
    fn try_allocate(&mut self, bytes: usize) -> Option<usize> {
        // SAFETY: `malloc` has no preconditions. A zero-byte request is
        // bumped to one byte so a unique pointer comes back.
        let raw = unsafe { libc::malloc(bytes.max(1)) };
        NonNull::new(raw.cast::<u8>()).map(|ptr| ptr.as_ptr().expose_provenance())
    }

    fn release(&mut self, addr: usize, _bytes: usize) {
        if addr == 0 {
            return;
        }
        let ptr = std::ptr::with_exposed_provenance_mut::<c_void>(addr);
        // SAFETY: the caller passes an address previously returned by
        // `try_allocate` on this allocator and not yet released.
        unsafe { libc::free(ptr) };
    }

    fn oom_handler(&self) -> Option<OomHandler> {
        self.handler.clone()
    }

    fn set_malloc_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler> {
        std::mem::replace(&mut self.handler, handler)
    }
}

impl fmt::Debug for DirectAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectAllocator")
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}
