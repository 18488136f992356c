//! Typed allocator facade.
//!
//! [`TypedAllocator<T, A>`] turns a byte-level [`RawAllocator`] into
//! count-based storage for values of `T`. It only acquires and releases
//! storage; placing and dropping values is done with [`construct`] and
//! [`destroy`].
//!
//! Zero-sized requests never reach the backing allocator. Types aligned
//! beyond the pool's 8-byte boundary are served by the global allocator
//! with their exact layout.

use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use parking_lot::Mutex;
use tinystl_core::error::AllocError;
use tinystl_core::malloc::{ALIGN, SystemHeap};

use crate::direct::DirectAllocator;
use crate::global::default_pool;
use crate::pool::PoolAllocator;

/// Byte-level allocation interface behind [`TypedAllocator`].
///
/// Returned blocks are aligned to at least [`ALIGN`] bytes.
pub trait RawAllocator {
    /// Allocates `bytes` bytes.
    fn allocate_bytes(&self, bytes: usize) -> Result<NonNull<u8>, AllocError>;

    /// Releases a block.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate_bytes` on the same allocator with the
    /// same `bytes`, and must not be used afterwards.
    unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>, bytes: usize);
}

/// The process-wide pool returned by [`default_pool`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DefaultPool;

impl RawAllocator for DefaultPool {
    fn allocate_bytes(&self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        default_pool().lock().allocate(bytes)
    }

    unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { default_pool().lock().deallocate(ptr, bytes) }
    }
}

impl RawAllocator for Mutex<PoolAllocator> {
    fn allocate_bytes(&self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        self.lock().allocate(bytes)
    }

    unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.lock().deallocate(ptr, bytes) }
    }
}

impl RawAllocator for Mutex<DirectAllocator> {
    fn allocate_bytes(&self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        let addr = self.lock().allocate(bytes)?;
        NonNull::new(std::ptr::with_exposed_provenance_mut::<u8>(addr))
            .ok_or(AllocError::OutOfMemory { bytes })
    }

    unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>, bytes: usize) {
        self.lock().release(ptr.as_ptr().expose_provenance(), bytes);
    }
}

/// Pass-through to the Rust global allocator, no pooling.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SystemAlloc;

impl SystemAlloc {
    fn layout(bytes: usize) -> Result<Layout, AllocError> {
        Layout::from_size_align(bytes.max(1), ALIGN).map_err(|_| AllocError::CapacityOverflow {
            count: bytes,
            elem_size: 1,
        })
    }
}

impl RawAllocator for SystemAlloc {
    fn allocate_bytes(&self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        let layout = Self::layout(bytes)?;
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(AllocError::OutOfMemory { bytes })
    }

    unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>, bytes: usize) {
        // A block of this size was allocated, so the layout is valid.
        if let Ok(layout) = Self::layout(bytes) {
            // SAFETY: forwarded caller contract; same layout as the allocation.
            unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

impl<A: RawAllocator + ?Sized> RawAllocator for &A {
    fn allocate_bytes(&self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate_bytes(bytes)
    }

    unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).deallocate_bytes(ptr, bytes) }
    }
}

/// Allocates a non-zero-sized `layout` from `raw`, or from the global
/// allocator when `layout` needs more than [`ALIGN`] alignment.
pub(crate) fn allocate_layout<A: RawAllocator + ?Sized>(
    raw: &A,
    layout: Layout,
) -> Result<NonNull<u8>, AllocError> {
    debug_assert!(layout.size() > 0);
    if layout.align() > ALIGN {
        // SAFETY: non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        return NonNull::new(ptr).ok_or(AllocError::OutOfMemory {
            bytes: layout.size(),
        });
    }
    raw.allocate_bytes(layout.size())
}

/// Counterpart of [`allocate_layout`].
///
/// # Safety
///
/// `ptr` must come from `allocate_layout(raw, layout)`.
pub(crate) unsafe fn deallocate_layout<A: RawAllocator + ?Sized>(
    raw: &A,
    ptr: NonNull<u8>,
    layout: Layout,
) {
    if layout.align() > ALIGN {
        // SAFETY: allocated by the global allocator with this layout.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        return;
    }
    // SAFETY: allocated by `raw` with this size.
    unsafe { raw.deallocate_bytes(ptr, layout.size()) }
}

/// Storage for values of `T` drawn from a [`RawAllocator`].
pub struct TypedAllocator<T, A: RawAllocator = DefaultPool> {
    raw: A,
    _marker: PhantomData<fn() -> T>,
}

impl<T, A: RawAllocator + Default> TypedAllocator<T, A> {
    /// Allocator over a default-constructed backing allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_allocator(A::default())
    }
}

impl<T, A: RawAllocator> TypedAllocator<T, A> {
    /// Allocator over `raw`.
    #[must_use]
    pub const fn with_allocator(raw: A) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// The backing allocator.
    #[must_use]
    pub fn allocator(&self) -> &A {
        &self.raw
    }

    /// Largest `n` accepted by [`allocate_n`](Self::allocate_n).
    #[must_use]
    pub const fn max_size(&self) -> usize {
        match size_of::<T>() {
            0 => usize::MAX,
            size => isize::MAX as usize / size,
        }
    }

    /// Uninitialized storage for one `T`.
    pub fn allocate(&self) -> Result<NonNull<T>, AllocError> {
        self.allocate_n(1)
    }

    /// Uninitialized storage for `n` contiguous values of `T`.
    pub fn allocate_n(&self, n: usize) -> Result<NonNull<T>, AllocError> {
        let layout = Self::array_layout(n)?;
        if layout.size() == 0 {
            return Ok(NonNull::dangling());
        }
        allocate_layout(&self.raw, layout).map(NonNull::cast)
    }

    /// Releases storage for one `T`.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`allocate`](Self::allocate) on an allocator
    /// over the same backing allocator. Any value stored there must already
    /// be dropped or moved out.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>) {
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate_n(ptr, 1) }
    }

    /// Releases storage for `n` values of `T`.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`allocate_n`](Self::allocate_n) with the same
    /// `n` on an allocator over the same backing allocator.
    pub unsafe fn deallocate_n(&self, ptr: NonNull<T>, n: usize) {
        let Ok(layout) = Self::array_layout(n) else {
            return;
        };
        if layout.size() == 0 {
            return;
        }
        // SAFETY: forwarded caller contract.
        unsafe { deallocate_layout(&self.raw, ptr.cast(), layout) }
    }

    /// Releases storage for `n` values of `T`; a null `ptr` is a no-op.
    ///
    /// # Safety
    ///
    /// As [`deallocate_n`](Self::deallocate_n) for a non-null `ptr`.
    pub unsafe fn deallocate_raw(&self, ptr: *mut T, n: usize) {
        if let Some(ptr) = NonNull::new(ptr) {
            // SAFETY: forwarded caller contract.
            unsafe { self.deallocate_n(ptr, n) }
        }
    }

    /// The same backing allocator, viewed for values of `U`.
    #[must_use]
    pub fn rebind<U>(self) -> TypedAllocator<U, A> {
        TypedAllocator::with_allocator(self.raw)
    }

    fn array_layout(n: usize) -> Result<Layout, AllocError> {
        Layout::array::<T>(n).map_err(|_| AllocError::CapacityOverflow {
            count: n,
            elem_size: size_of::<T>(),
        })
    }
}

impl<T, A: RawAllocator + Default> Default for TypedAllocator<T, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: RawAllocator + Clone> Clone for TypedAllocator<T, A> {
    fn clone(&self) -> Self {
        Self::with_allocator(self.raw.clone())
    }
}

impl<T, A: RawAllocator + fmt::Debug> fmt::Debug for TypedAllocator<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedAllocator")
            .field("type", &std::any::type_name::<T>())
            .field("raw", &self.raw)
            .finish()
    }
}

/// Moves `value` into uninitialized storage at `ptr`.
///
/// # Safety
///
/// `ptr` must be valid for writes and properly aligned. A value already at
/// `ptr` is overwritten without being dropped.
pub unsafe fn construct<T>(ptr: NonNull<T>, value: T) {
    // SAFETY: forwarded caller contract.
    unsafe { ptr.as_ptr().write(value) }
}

/// Drops the value at `ptr` in place, leaving the storage allocated.
///
/// # Safety
///
/// `ptr` must point to a live, initialized value that is not used again.
pub unsafe fn destroy<T: ?Sized>(ptr: NonNull<T>) {
    // SAFETY: forwarded caller contract.
    unsafe { std::ptr::drop_in_place(ptr.as_ptr()) }
}

/// Drops `n` contiguous values starting at `first`.
///
/// # Safety
///
/// As [`destroy`] for every element of the range.
pub unsafe fn destroy_n<T>(first: NonNull<T>, n: usize) {
    // SAFETY: forwarded caller contract.
    unsafe { destroy(NonNull::slice_from_raw_parts(first, n)) }
}
