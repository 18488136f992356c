//! Deleters: how a smart pointer disposes of the object it owns.

use std::fmt;
use std::ptr::NonNull;

use crate::typed::{TypedAllocator, destroy};

/// Disposes of an owned object.
pub trait Deleter<T: ?Sized> {
    /// Destroys the object at `ptr` and releases its storage.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live object this deleter is able to dispose of, and
    /// must not be used again.
    unsafe fn delete(&mut self, ptr: NonNull<T>);
}

/// Drops the object and returns its storage to the default pool.
///
/// Pairs with `SharedPtr::new`, `UniquePtr::new` and
/// `UniquePtr::new_slice`, and with any storage obtained from
/// `TypedAllocator<T>::new()`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefaultDelete;

impl<T> Deleter<T> for DefaultDelete {
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        // SAFETY: caller contract; the storage came from the default pool.
        unsafe {
            destroy(ptr);
            TypedAllocator::<T>::new().deallocate(ptr);
        }
    }
}

impl<T> Deleter<[T]> for DefaultDelete {
    unsafe fn delete(&mut self, ptr: NonNull<[T]>) {
        let len = ptr.len();
        // SAFETY: caller contract; the storage came from the default pool
        // as `len` contiguous values.
        unsafe {
            destroy(ptr);
            TypedAllocator::<T>::new().deallocate_n(ptr.cast::<T>(), len);
        }
    }
}

/// Reconstitutes and drops a `Box`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxDelete;

impl<T: ?Sized> Deleter<T> for BoxDelete {
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        // SAFETY: caller contract; `ptr` came from `Box::into_raw`.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

/// Deleter wrapping a closure, built with [`deleter_fn`].
#[derive(Clone, Copy)]
pub struct FnDeleter<F>(F);

/// Wraps `f` as a deleter.
///
/// ```
/// use std::ptr::NonNull;
/// use tinystl_mem::smart::{UniquePtr, deleter_fn};
///
/// let raw = NonNull::from(Box::leak(Box::new(5u32)));
/// let reclaim = deleter_fn(|p: NonNull<u32>| {
///     // SAFETY: `p` is the leaked box, reclaimed exactly once.
///     drop(unsafe { Box::from_raw(p.as_ptr()) });
/// });
/// // SAFETY: `reclaim` matches how `raw` was produced.
/// let owned = unsafe { UniquePtr::from_raw_with_deleter(raw, reclaim) };
/// assert_eq!(*owned, 5);
/// ```
pub fn deleter_fn<F>(f: F) -> FnDeleter<F> {
    FnDeleter(f)
}

impl<F> FnDeleter<F> {
    /// The wrapped closure.
    pub fn get_ref(&self) -> &F {
        &self.0
    }
}

impl<T: ?Sized, F: FnMut(NonNull<T>)> Deleter<T> for FnDeleter<F> {
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        (self.0)(ptr);
    }
}

impl<F> fmt::Debug for FnDeleter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FnDeleter")
            .field(&std::any::type_name::<F>())
            .finish()
    }
}
