//! Exclusive-ownership pointer.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use tinystl_core::error::AllocError;

use super::deleter::{BoxDelete, DefaultDelete, Deleter};
use super::thin_addr;
use crate::typed::{TypedAllocator, construct, destroy_n};

/// Single-owner pointer with a pluggable deleter.
///
/// Moving transfers ownership; there is no `Clone`. The deleter runs exactly
/// once, when a non-empty pointer is dropped or reset.
pub struct UniquePtr<T: ?Sized, D: Deleter<T> = DefaultDelete> {
    ptr: Option<NonNull<T>>,
    deleter: D,
    _marker: PhantomData<T>,
}

// SAFETY: `UniquePtr` owns its pointee like a `Box` does.
unsafe impl<T: ?Sized + Send, D: Deleter<T> + Send> Send for UniquePtr<T, D> {}
// SAFETY: shared access only hands out `&T` and `&D`.
unsafe impl<T: ?Sized + Sync, D: Deleter<T> + Sync> Sync for UniquePtr<T, D> {}

impl<T> UniquePtr<T> {
    /// Moves `value` into the default pool.
    ///
    /// # Panics
    ///
    /// Panics if the pool cannot provide the storage.
    #[must_use]
    pub fn new(value: T) -> Self {
        match Self::try_new(value) {
            Ok(unique) => unique,
            Err(err) => panic!("UniquePtr::new: {err}"),
        }
    }

    /// Fallible form of [`new`](Self::new).
    pub fn try_new(value: T) -> Result<Self, AllocError> {
        let ptr = TypedAllocator::<T>::new().allocate()?;
        // SAFETY: fresh default-pool storage, released by `DefaultDelete`.
        unsafe {
            construct(ptr, value);
            Ok(Self::from_raw(ptr))
        }
    }
}

impl<T: Default> UniquePtr<[T]> {
    /// `n` default values in one default-pool block.
    ///
    /// # Panics
    ///
    /// Panics if the pool cannot provide the storage.
    #[must_use]
    pub fn new_slice(n: usize) -> Self {
        match Self::try_new_slice(n) {
            Ok(unique) => unique,
            Err(err) => panic!("UniquePtr::new_slice: {err}"),
        }
    }

    /// Fallible form of [`new_slice`](Self::new_slice).
    pub fn try_new_slice(n: usize) -> Result<Self, AllocError> {
        let alloc = TypedAllocator::<T>::new();
        let first = alloc.allocate_n(n)?;
        let mut guard = PartialSlice {
            alloc: &alloc,
            first,
            capacity: n,
            initialized: 0,
        };
        while guard.initialized < n {
            // SAFETY: within the `n` allocated slots.
            unsafe { construct(first.add(guard.initialized), T::default()) };
            guard.initialized += 1;
        }
        std::mem::forget(guard);
        // SAFETY: `n` initialized values in default-pool storage.
        Ok(unsafe { Self::from_raw(NonNull::slice_from_raw_parts(first, n)) })
    }
}

/// Cleans up a slice under construction if `T::default` panics.
struct PartialSlice<'a, T> {
    alloc: &'a TypedAllocator<T>,
    first: NonNull<T>,
    capacity: usize,
    initialized: usize,
}

impl<T> Drop for PartialSlice<'_, T> {
    fn drop(&mut self) {
        // SAFETY: exactly `initialized` values were constructed in storage
        // allocated for `capacity` values.
        unsafe {
            destroy_n(self.first, self.initialized);
            self.alloc.deallocate_n(self.first, self.capacity);
        }
    }
}

impl<T: ?Sized> UniquePtr<T, BoxDelete> {
    /// Takes over a `Box`.
    #[must_use]
    pub fn from_box(boxed: Box<T>) -> Self {
        // SAFETY: `BoxDelete` reclaims pointers from `Box::into_raw`.
        unsafe { Self::from_raw_with_deleter(NonNull::from(Box::leak(boxed)), BoxDelete) }
    }
}

impl<T: ?Sized, D: Deleter<T> + Default> UniquePtr<T, D> {
    /// Empty pointer.
    #[must_use]
    pub fn null() -> Self {
        Self::null_with_deleter(D::default())
    }

    /// Takes ownership of `ptr` with a default-constructed deleter.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live object `D::default()` can dispose of, owned by
    /// nothing else.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        // SAFETY: forwarded caller contract.
        unsafe { Self::from_raw_with_deleter(ptr, D::default()) }
    }
}

impl<T: ?Sized, D: Deleter<T>> UniquePtr<T, D> {
    /// Empty pointer carrying `deleter` for later use.
    #[must_use]
    pub const fn null_with_deleter(deleter: D) -> Self {
        Self {
            ptr: None,
            deleter,
            _marker: PhantomData,
        }
    }

    /// Takes ownership of `ptr`, disposing of it with `deleter`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live object `deleter` can dispose of, owned by
    /// nothing else.
    pub const unsafe fn from_raw_with_deleter(ptr: NonNull<T>, deleter: D) -> Self {
        Self {
            ptr: Some(ptr),
            deleter,
            _marker: PhantomData,
        }
    }

    /// Gives up ownership without running the deleter.
    ///
    /// The caller becomes responsible for the returned object.
    #[must_use = "the released object leaks unless the caller disposes of it"]
    pub fn release(&mut self) -> Option<NonNull<T>> {
        self.ptr.take()
    }

    /// Installs `ptr`, then deletes the previously held object, if any.
    ///
    /// # Safety
    ///
    /// A `Some` pointer must satisfy the contract of
    /// [`from_raw_with_deleter`](Self::from_raw_with_deleter) for this
    /// pointer's deleter.
    pub unsafe fn reset_raw(&mut self, ptr: Option<NonNull<T>>) {
        if let Some(old) = std::mem::replace(&mut self.ptr, ptr) {
            // SAFETY: `old` was owned by this pointer.
            unsafe { self.deleter.delete(old) };
        }
    }

    /// Deletes the held object, if any, leaving the pointer empty.
    pub fn reset(&mut self) {
        // SAFETY: installing nothing.
        unsafe { self.reset_raw(None) }
    }

    /// The owned object, or `None` when empty.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: an owned pointer is valid until deleted.
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// Mutable access to the owned object.
    #[must_use]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        // SAFETY: exclusive ownership.
        self.ptr.map(|ptr| unsafe { &mut *ptr.as_ptr() })
    }

    /// The owned pointer.
    #[must_use]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Returns true if nothing is owned.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// The deleter.
    #[must_use]
    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    /// Mutable access to the deleter.
    pub fn deleter_mut(&mut self) -> &mut D {
        &mut self.deleter
    }

    /// Exchanges pointers and deleters.
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// Splits into the owned pointer and the deleter without deleting.
    pub(crate) fn into_raw_parts(self) -> (Option<NonNull<T>>, D) {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the deleter is moved out once.
        let deleter = unsafe { std::ptr::read(&this.deleter) };
        (this.ptr, deleter)
    }
}

impl<T: ?Sized, D: Deleter<T>> Drop for UniquePtr<T, D> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized, D: Deleter<T> + Default> Default for UniquePtr<T, D> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized, D: Deleter<T>> Deref for UniquePtr<T, D> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty UniquePtr"),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> DerefMut for UniquePtr<T, D> {
    fn deref_mut(&mut self) -> &mut T {
        match self.get_mut() {
            Some(value) => value,
            None => panic!("dereferenced an empty UniquePtr"),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>, U: ?Sized, E: Deleter<U>> PartialEq<UniquePtr<U, E>>
    for UniquePtr<T, D>
{
    fn eq(&self, other: &UniquePtr<U, E>) -> bool {
        thin_addr(self.ptr) == thin_addr(other.ptr)
    }
}

impl<T: ?Sized, D: Deleter<T>> Eq for UniquePtr<T, D> {}

impl<T: ?Sized, D: Deleter<T>, U: ?Sized, E: Deleter<U>> PartialOrd<UniquePtr<U, E>>
    for UniquePtr<T, D>
{
    fn partial_cmp(&self, other: &UniquePtr<U, E>) -> Option<Ordering> {
        Some(thin_addr(self.ptr).cmp(&thin_addr(other.ptr)))
    }
}

impl<T: ?Sized, D: Deleter<T>> Ord for UniquePtr<T, D> {
    fn cmp(&self, other: &Self) -> Ordering {
        thin_addr(self.ptr).cmp(&thin_addr(other.ptr))
    }
}

impl<T: ?Sized, D: Deleter<T>> Hash for UniquePtr<T, D> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        thin_addr(self.ptr).hash(state);
    }
}

impl<T: ?Sized, D: Deleter<T>> fmt::Pointer for UniquePtr<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw: *const () = self.ptr.map_or(std::ptr::null(), |p| p.as_ptr().cast_const().cast());
        fmt::Pointer::fmt(&raw, f)
    }
}

impl<T: ?Sized + fmt::Debug, D: Deleter<T>> fmt::Debug for UniquePtr<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("UniquePtr").field(&value).finish(),
            None => f.write_str("UniquePtr(null)"),
        }
    }
}
