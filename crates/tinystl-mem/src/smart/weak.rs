//! Non-owning observer of a shared object.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use super::control::{ErasedBlock, release_weak};
use super::shared::SharedPtr;
use super::{OwnerKey, owner_addr};

/// Weak reference to an object managed by [`SharedPtr`].
///
/// Keeps the control block alive but not the object. [`lock`](Self::lock)
/// upgrades atomically: it either observes a live object and takes a strong
/// reference in the same compare-and-swap, or returns an empty pointer. It
/// can never resurrect an object whose last owner is already gone.
pub struct WeakPtr<T: ?Sized> {
    ptr: Option<NonNull<T>>,
    cb: Option<NonNull<ErasedBlock>>,
    _marker: PhantomData<T>,
}

// SAFETY: same reasoning as for `SharedPtr`; a `WeakPtr` can be upgraded
// into one on any thread.
unsafe impl<T: ?Sized + Send + Sync> Send for WeakPtr<T> {}
// SAFETY: as above.
unsafe impl<T: ?Sized + Send + Sync> Sync for WeakPtr<T> {}

impl<T: ?Sized> WeakPtr<T> {
    /// Weak reference that observes nothing. Always expired.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ptr: None,
            cb: None,
            _marker: PhantomData,
        }
    }

    /// Number of `SharedPtr`s owning the object; 0 once expired.
    #[must_use]
    pub fn use_count(&self) -> usize {
        // SAFETY: our weak reference keeps the block alive.
        self.cb.map_or(0, |cb| unsafe { cb.as_ref().strong_count() })
    }

    /// Returns true if the object is gone (or was never observed).
    #[must_use]
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// A new owner of the object, or an empty pointer if it expired.
    #[must_use]
    pub fn lock(&self) -> SharedPtr<T> {
        match self.cb {
            // SAFETY: our weak reference keeps the block alive.
            Some(cb) if unsafe { cb.as_ref().try_increment_strong() } => {
                SharedPtr::from_parts(self.ptr, Some(cb))
            }
            _ => SharedPtr::null(),
        }
    }

    /// Stops observing, leaving the reference empty.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Exchanges the contents of two weak references.
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// Owner-based ordering: compares control blocks.
    #[must_use]
    pub fn owner_before(&self, other: &impl OwnerKey) -> bool {
        self.owner_key() < other.owner_key()
    }
}

impl<T: ?Sized> OwnerKey for WeakPtr<T> {
    fn owner_key(&self) -> usize {
        owner_addr(self.cb)
    }
}

impl<T: ?Sized> From<&SharedPtr<T>> for WeakPtr<T> {
    fn from(shared: &SharedPtr<T>) -> Self {
        let cb = shared.control_block();
        if let Some(cb) = cb {
            // SAFETY: `shared` holds a strong reference.
            unsafe { cb.as_ref().increment_weak() };
        }
        Self {
            ptr: shared.as_ptr(),
            cb,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Clone for WeakPtr<T> {
    fn clone(&self) -> Self {
        if let Some(cb) = self.cb {
            // SAFETY: our weak reference keeps the block alive.
            unsafe { cb.as_ref().increment_weak() };
        }
        Self {
            ptr: self.ptr,
            cb: self.cb,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for WeakPtr<T> {
    fn drop(&mut self) {
        if let Some(cb) = self.cb.take() {
            // SAFETY: we own one weak reference and give it up.
            unsafe { release_weak(cb) };
        }
    }
}

impl<T: ?Sized> Default for WeakPtr<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for WeakPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPtr")
            .field("use_count", &self.use_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smart::BadWeakPtr;

    #[test]
    fn test_empty_weak_is_expired() {
        let w: WeakPtr<u8> = WeakPtr::new();
        assert!(w.expired());
        assert!(w.lock().is_null());
        assert_eq!(SharedPtr::<u8>::try_from(&w).unwrap_err(), BadWeakPtr);
    }

    #[test]
    fn test_weak_does_not_own() {
        let s = SharedPtr::new(5);
        let w = s.downgrade();
        assert_eq!(w.use_count(), 1);
        assert!(!w.expired());

        let again = w.lock();
        assert_eq!(*again, 5);
        assert_eq!(s.use_count(), 2);
        drop(again);
        drop(s);

        assert!(w.expired());
        assert!(w.lock().is_null());
    }

    #[test]
    fn test_expired_weak_reports_error() {
        let s = SharedPtr::new(String::from("gone"));
        let w = WeakPtr::from(&s);
        assert_eq!(SharedPtr::<String>::try_from(&w).unwrap().as_str(), "gone");
        drop(s);
        let err = SharedPtr::<String>::try_from(&w).unwrap_err();
        assert_eq!(err.to_string(), "expired weak ptr");
    }

    #[test]
    fn test_clone_reset_swap() {
        let s = SharedPtr::new(1);
        let t = SharedPtr::new(2);
        let mut a = s.downgrade();
        let mut b = t.downgrade();
        let c = a.clone();
        a.swap(&mut b);
        assert_eq!(*a.lock(), 2);
        assert_eq!(*b.lock(), 1);
        b.reset();
        assert!(b.expired());
        assert!(!c.expired());
        assert!(!c.owner_before(&s) && !s.owner_before(&c));
    }

    #[test]
    fn test_weak_outliving_everything_frees_block() {
        let s = SharedPtr::new(vec![1, 2, 3]);
        let w1 = s.downgrade();
        let w2 = w1.clone();
        drop(s);
        drop(w1);
        assert!(w2.expired());
        drop(w2);
    }
}
