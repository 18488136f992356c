//! Recovering a `SharedPtr` from a reference to the shared object.
//!
//! A type that embeds an [`EnableSharedFromThis`] anchor and implements
//! [`SharedFromThis`] can hand out new owners of itself from `&self`. The
//! anchor holds a weak reference to the object's own control block; it is
//! bound when the object is shared through [`SharedPtr::new_enabled`], or
//! later through [`SharedPtr::enable_shared_from_this`].

use std::fmt;

use parking_lot::Mutex;

use super::BadWeakPtr;
use super::shared::SharedPtr;
use super::weak::WeakPtr;
use tinystl_core::error::AllocError;

/// Weak self-reference embedded in a shared object.
///
/// Cloning yields an unbound anchor: a copy of an object is a different
/// object with no owner yet.
pub struct EnableSharedFromThis<T> {
    weak_this: Mutex<WeakPtr<T>>,
}

impl<T> EnableSharedFromThis<T> {
    /// Unbound anchor.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            weak_this: Mutex::new(WeakPtr::new()),
        }
    }

    /// A new owner of the enclosing object.
    ///
    /// Fails with [`BadWeakPtr`] when the object is not currently owned by
    /// a bound `SharedPtr`.
    pub fn shared_from_this(&self) -> Result<SharedPtr<T>, BadWeakPtr> {
        let shared = self.weak_this.lock().lock();
        if shared.is_null() {
            return Err(BadWeakPtr);
        }
        Ok(shared)
    }

    /// A weak reference to the enclosing object; expired when unbound.
    #[must_use]
    pub fn weak_from_this(&self) -> WeakPtr<T> {
        self.weak_this.lock().clone()
    }

    /// Binds to `owner` unless already bound to a live owner.
    fn bind(&self, owner: &SharedPtr<T>) {
        let mut weak_this = self.weak_this.lock();
        if weak_this.expired() {
            *weak_this = owner.downgrade();
        }
    }
}

impl<T> Default for EnableSharedFromThis<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EnableSharedFromThis<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EnableSharedFromThis<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnableSharedFromThis")
            .field("bound", &!self.weak_this.lock().expired())
            .finish()
    }
}

/// Types that can produce owners of themselves from `&self`.
///
/// ```
/// use tinystl_mem::smart::{EnableSharedFromThis, SharedFromThis, SharedPtr};
///
/// struct Session {
///     anchor: EnableSharedFromThis<Session>,
///     id: u32,
/// }
///
/// impl SharedFromThis for Session {
///     fn anchor(&self) -> &EnableSharedFromThis<Self> {
///         &self.anchor
///     }
/// }
///
/// let session = SharedPtr::new_enabled(Session { anchor: Default::default(), id: 3 });
/// let again = session.shared_from_this().unwrap();
/// assert_eq!(again.id, 3);
/// assert_eq!(session.use_count(), 2);
/// ```
pub trait SharedFromThis: Sized + 'static {
    /// The embedded anchor.
    fn anchor(&self) -> &EnableSharedFromThis<Self>;

    /// See [`EnableSharedFromThis::shared_from_this`].
    fn shared_from_this(&self) -> Result<SharedPtr<Self>, BadWeakPtr> {
        self.anchor().shared_from_this()
    }

    /// See [`EnableSharedFromThis::weak_from_this`].
    fn weak_from_this(&self) -> WeakPtr<Self> {
        self.anchor().weak_from_this()
    }
}

impl<T: SharedFromThis> SharedPtr<T> {
    /// [`new`](SharedPtr::new), then binds the object's anchor.
    ///
    /// # Panics
    ///
    /// Panics if the pool cannot provide the object or the control block.
    #[must_use]
    pub fn new_enabled(value: T) -> Self {
        match Self::try_new_enabled(value) {
            Ok(shared) => shared,
            Err(err) => panic!("SharedPtr::new_enabled: {err}"),
        }
    }

    /// Fallible form of [`new_enabled`](Self::new_enabled).
    pub fn try_new_enabled(value: T) -> Result<Self, AllocError> {
        let shared = Self::try_new(value)?;
        shared.enable_shared_from_this();
        Ok(shared)
    }

    /// Binds the object's anchor to this pointer's control block, for
    /// pointers built with `from_raw`, `with_deleter` or from a
    /// `UniquePtr`. A no-op on an empty pointer or an anchor that is
    /// already bound to a live owner.
    pub fn enable_shared_from_this(&self) {
        if let Some(value) = self.get() {
            value.anchor().bind(self);
        }
    }
}
