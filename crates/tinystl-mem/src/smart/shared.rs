//! Shared-ownership pointer.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

use tinystl_core::error::AllocError;

use super::BadWeakPtr;
use super::control::{ErasedBlock, allocate_block, release_strong};
use super::deleter::{DefaultDelete, Deleter};
use super::unique::UniquePtr;
use super::weak::WeakPtr;
use super::{OwnerKey, owner_addr, thin_addr};
use crate::typed::{TypedAllocator, construct};

/// Reference-counted owning pointer.
///
/// Every clone shares one control block. The object is destroyed by its
/// deleter when the last `SharedPtr` goes away; the control block itself
/// lives on while [`WeakPtr`]s observe it.
///
/// The stored pointer may differ from the managed one (see
/// [`aliasing`](Self::aliasing) and [`project`](Self::project)); equality,
/// ordering and hashing use the stored pointer, while
/// [`owner_before`](Self::owner_before) uses the control block.
pub struct SharedPtr<T: ?Sized> {
    ptr: Option<NonNull<T>>,
    cb: Option<NonNull<ErasedBlock>>,
    _marker: PhantomData<T>,
}

// SAFETY: counts are atomic, and deleters are required to be `Send + Sync`
// at construction. The pointee may be dropped or accessed on any thread.
unsafe impl<T: ?Sized + Send + Sync> Send for SharedPtr<T> {}
// SAFETY: as above.
unsafe impl<T: ?Sized + Send + Sync> Sync for SharedPtr<T> {}

impl<T: 'static> SharedPtr<T> {
    /// Moves `value` into the default pool and shares it.
    ///
    /// # Panics
    ///
    /// Panics if the pool cannot provide the object or the control block.
    #[must_use]
    pub fn new(value: T) -> Self {
        match Self::try_new(value) {
            Ok(shared) => shared,
            Err(err) => panic!("SharedPtr::new: {err}"),
        }
    }

    /// Fallible form of [`new`](Self::new). `value` is dropped on failure.
    pub fn try_new(value: T) -> Result<Self, AllocError> {
        let ptr = TypedAllocator::<T>::new().allocate()?;
        // SAFETY: fresh storage from the default pool, which is what
        // `DefaultDelete` releases to.
        unsafe {
            construct(ptr, value);
            Self::try_with_deleter(ptr, DefaultDelete)
        }
    }

    /// Replaces the managed object with a freshly allocated `value`.
    pub fn reset_with(&mut self, value: T) {
        *self = Self::new(value);
    }
}

impl<T: ?Sized + 'static> SharedPtr<T> {
    /// Takes ownership of `ptr`, disposing of it with [`DefaultDelete`].
    ///
    /// # Safety
    ///
    /// `ptr` must be a live object whose storage came from the default pool
    /// (for instance through `TypedAllocator<T>::new()`), owned by nothing
    /// else.
    ///
    /// # Panics
    ///
    /// Panics if the control block cannot be allocated; the object is
    /// deleted first.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self
    where
        DefaultDelete: Deleter<T>,
    {
        // SAFETY: forwarded caller contract.
        unsafe { Self::with_deleter(ptr, DefaultDelete) }
    }

    /// Takes ownership of `ptr`, disposing of it with `deleter`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live object `deleter` can dispose of, owned by
    /// nothing else.
    ///
    /// # Panics
    ///
    /// Panics if the control block cannot be allocated; `deleter` runs on
    /// `ptr` first.
    pub unsafe fn with_deleter<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        D: Deleter<T> + Send + Sync + 'static,
    {
        // SAFETY: forwarded caller contract.
        match unsafe { Self::try_with_deleter(ptr, deleter) } {
            Ok(shared) => shared,
            Err(err) => panic!("SharedPtr::with_deleter: {err}"),
        }
    }

    /// Fallible form of [`with_deleter`](Self::with_deleter).
    ///
    /// # Safety
    ///
    /// As [`with_deleter`](Self::with_deleter).
    pub unsafe fn try_with_deleter<D>(ptr: NonNull<T>, deleter: D) -> Result<Self, AllocError>
    where
        D: Deleter<T> + Send + Sync + 'static,
    {
        // SAFETY: forwarded caller contract.
        let cb = unsafe { allocate_block(ptr, deleter)? };
        Ok(Self::from_parts(Some(ptr), Some(cb)))
    }

    /// Moves the object out of `unique` into a new control block that keeps
    /// `unique`'s deleter. An empty `unique` gives an empty pointer.
    pub fn try_from_unique<D>(unique: UniquePtr<T, D>) -> Result<Self, AllocError>
    where
        D: Deleter<T> + Send + Sync + 'static,
    {
        let (ptr, deleter) = unique.into_raw_parts();
        match ptr {
            // SAFETY: `UniquePtr` owned `ptr` exclusively, paired with `deleter`.
            Some(ptr) => unsafe { Self::try_with_deleter(ptr, deleter) },
            None => Ok(Self::null()),
        }
    }
}

impl<T: ?Sized> SharedPtr<T> {
    /// Empty pointer: owns nothing, `use_count() == 0`.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            ptr: None,
            cb: None,
            _marker: PhantomData,
        }
    }

    /// Takes over one strong reference. The caller hands it in.
    pub(crate) fn from_parts(ptr: Option<NonNull<T>>, cb: Option<NonNull<ErasedBlock>>) -> Self {
        Self {
            ptr,
            cb,
            _marker: PhantomData,
        }
    }

    pub(crate) fn control_block(&self) -> Option<NonNull<ErasedBlock>> {
        self.cb
    }

    /// Shares ownership with `owner` while pointing at `ptr`.
    ///
    /// The object managed by `owner` stays alive as long as the result
    /// exists, even though [`get`](Self::get) returns `ptr`. An empty
    /// `owner` yields an empty pointer: a stored pointer always comes with a
    /// control block.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for as long as `owner`'s object is alive,
    /// typically because it points into that object.
    pub unsafe fn aliasing<U: ?Sized>(owner: &SharedPtr<U>, ptr: NonNull<T>) -> Self {
        let Some(cb) = owner.cb else {
            return Self::null();
        };
        // SAFETY: `owner` holds a strong reference.
        unsafe { cb.as_ref().increment_strong() };
        Self::from_parts(Some(ptr), Some(cb))
    }

    /// Shares ownership while pointing at a part of the object, or at the
    /// object as another type (for instance a trait object).
    ///
    /// An empty pointer projects to an empty pointer.
    ///
    /// ```
    /// use std::fmt::Display;
    /// use tinystl_mem::smart::SharedPtr;
    ///
    /// fn first(pair: &(u8, String)) -> &(dyn Display + 'static) {
    ///     &pair.0
    /// }
    ///
    /// let pair = SharedPtr::new((1u8, String::from("two")));
    /// let second = pair.project(|p| &p.1);
    /// let shown: SharedPtr<dyn Display> = pair.project(first);
    /// drop(pair);
    /// assert_eq!(*second, "two");
    /// assert_eq!(shown.to_string(), "1");
    /// assert_eq!(second.use_count(), 2);
    /// ```
    pub fn project<U: ?Sized, F>(&self, f: F) -> SharedPtr<U>
    where
        F: FnOnce(&T) -> &U,
    {
        match self.get() {
            // SAFETY: the reference is derived from the object kept alive by
            // our control block.
            Some(value) => unsafe { SharedPtr::aliasing(self, NonNull::from(f(value))) },
            None => SharedPtr::null(),
        }
    }

    /// The stored object, or `None` for an empty pointer.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: a stored pointer is valid while we hold a strong
        // reference.
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// The stored pointer.
    #[must_use]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Returns true if no pointer is stored.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Number of `SharedPtr`s sharing the control block; 0 when empty.
    #[must_use]
    pub fn use_count(&self) -> usize {
        // SAFETY: our strong reference keeps the block alive.
        self.cb.map_or(0, |cb| unsafe { cb.as_ref().strong_count() })
    }

    /// Returns true if this is the only owner.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.use_count() == 1
    }

    /// Releases ownership, leaving the pointer empty.
    pub fn reset(&mut self) {
        *self = Self::null();
    }

    /// Exchanges the contents of two pointers.
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// A weak reference to the same control block.
    #[must_use]
    pub fn downgrade(&self) -> WeakPtr<T> {
        WeakPtr::from(self)
    }

    /// The deleter, if it is a `D`.
    #[must_use]
    pub fn get_deleter<D: 'static>(&self) -> Option<&D> {
        let cb = self.cb?;
        // SAFETY: our strong reference keeps the block and its deleter
        // alive for the lifetime of `&self`.
        unsafe { (*cb.as_ptr()).deleter().downcast_ref::<D>() }
    }

    /// Returns true if both store the same address.
    #[must_use]
    pub fn ptr_eq<U: ?Sized>(&self, other: &SharedPtr<U>) -> bool {
        thin_addr(self.ptr) == thin_addr(other.ptr)
    }

    /// Owner-based ordering: compares control blocks, not stored pointers.
    #[must_use]
    pub fn owner_before(&self, other: &impl OwnerKey) -> bool {
        self.owner_key() < other.owner_key()
    }

    /// Returns true if both share a control block (or are both empty).
    #[must_use]
    pub fn owner_eq(&self, other: &impl OwnerKey) -> bool {
        self.owner_key() == other.owner_key()
    }
}

impl<T: Any + Send + Sync> SharedPtr<T> {
    /// Erases the type, keeping ownership. Reverse with
    /// [`downcast`](SharedPtr::downcast).
    #[must_use]
    pub fn into_any(mut self) -> SharedPtr<dyn Any + Send + Sync> {
        let ptr = self.ptr.take().map(|ptr| -> NonNull<dyn Any + Send + Sync> { ptr });
        SharedPtr::from_parts(ptr, self.cb.take())
    }
}

impl SharedPtr<dyn Any + Send + Sync> {
    /// Recovers the concrete type, sharing the same control block.
    ///
    /// On a type mismatch the pointer is handed back unchanged. An empty
    /// pointer never matches.
    ///
    /// ```
    /// use tinystl_mem::smart::SharedPtr;
    ///
    /// let any = SharedPtr::new(7u32).into_any();
    /// let any = any.downcast::<String>().unwrap_err();
    /// let number = any.downcast::<u32>().unwrap();
    /// assert_eq!(*number, 7);
    /// assert_eq!(number.use_count(), 1);
    /// ```
    pub fn downcast<T: Any>(mut self) -> Result<SharedPtr<T>, Self> {
        let Some(ptr) = self
            .get()
            .and_then(|value| value.downcast_ref::<T>())
            .map(NonNull::from)
        else {
            return Err(self);
        };
        self.ptr = None;
        Ok(SharedPtr::from_parts(Some(ptr), self.cb.take()))
    }
}

impl<T: ?Sized> OwnerKey for SharedPtr<T> {
    fn owner_key(&self) -> usize {
        owner_addr(self.cb)
    }
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    fn clone(&self) -> Self {
        if let Some(cb) = self.cb {
            // SAFETY: our strong reference keeps the block alive.
            unsafe { cb.as_ref().increment_strong() };
        }
        Self::from_parts(self.ptr, self.cb)
    }
}

impl<T: ?Sized> Drop for SharedPtr<T> {
    fn drop(&mut self) {
        if let Some(cb) = self.cb.take() {
            // SAFETY: we own one strong reference and give it up.
            unsafe { release_strong(cb) };
        }
    }
}

impl<T: ?Sized> Default for SharedPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> Deref for SharedPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty SharedPtr"),
        }
    }
}

impl<T: ?Sized> TryFrom<&WeakPtr<T>> for SharedPtr<T> {
    type Error = BadWeakPtr;

    fn try_from(weak: &WeakPtr<T>) -> Result<Self, BadWeakPtr> {
        let shared = weak.lock();
        if shared.control_block().is_none() {
            return Err(BadWeakPtr);
        }
        Ok(shared)
    }
}

impl<T, D> From<UniquePtr<T, D>> for SharedPtr<T>
where
    T: ?Sized + 'static,
    D: Deleter<T> + Send + Sync + 'static,
{
    /// # Panics
    ///
    /// Panics if the control block cannot be allocated; the object is
    /// deleted first.
    fn from(unique: UniquePtr<T, D>) -> Self {
        match Self::try_from_unique(unique) {
            Ok(shared) => shared,
            Err(err) => panic!("SharedPtr::from(UniquePtr): {err}"),
        }
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<SharedPtr<U>> for SharedPtr<T> {
    fn eq(&self, other: &SharedPtr<U>) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: ?Sized> Eq for SharedPtr<T> {}

impl<T: ?Sized, U: ?Sized> PartialOrd<SharedPtr<U>> for SharedPtr<T> {
    fn partial_cmp(&self, other: &SharedPtr<U>) -> Option<Ordering> {
        Some(thin_addr(self.ptr).cmp(&thin_addr(other.ptr)))
    }
}

impl<T: ?Sized> Ord for SharedPtr<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        thin_addr(self.ptr).cmp(&thin_addr(other.ptr))
    }
}

impl<T: ?Sized> Hash for SharedPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        thin_addr(self.ptr).hash(state);
    }
}

impl<T: ?Sized> fmt::Pointer for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw: *const () = self.ptr.map_or(std::ptr::null(), |p| p.as_ptr().cast_const().cast());
        fmt::Pointer::fmt(&raw, f)
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f
                .debug_struct("SharedPtr")
                .field("value", &value)
                .field("use_count", &self.use_count())
                .finish(),
            None => f.write_str("SharedPtr(null)"),
        }
    }
}
