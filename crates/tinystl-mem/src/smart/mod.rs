//! Smart pointers over the default pool.
//!
//! - [`SharedPtr`]: shared ownership through an atomically counted control
//!   block; the last owner runs the deleter.
//! - [`WeakPtr`]: observes a shared object without keeping it alive.
//! - [`UniquePtr`]: exclusive ownership with a pluggable [`Deleter`].
//! - [`EnableSharedFromThis`]: lets a shared object hand out owners of
//!   itself.
//!
//! Objects created by `new` and every control block are allocated from
//! [`default_pool`](crate::global::default_pool). Deleters always run
//! before the pool lock is taken, so a deleter may itself free pooled
//! memory.

use std::ptr::NonNull;

use thiserror::Error;

mod control;
pub mod deleter;
pub mod from_this;
pub mod shared;
pub mod unique;
pub mod weak;

use control::ErasedBlock;

pub use deleter::{BoxDelete, DefaultDelete, Deleter, FnDeleter, deleter_fn};
pub use from_this::{EnableSharedFromThis, SharedFromThis};
pub use shared::SharedPtr;
pub use unique::UniquePtr;
pub use weak::WeakPtr;

/// Upgrading an expired [`WeakPtr`] with `SharedPtr::try_from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expired weak ptr")]
pub struct BadWeakPtr;

/// Identity of the control block behind a shared or weak pointer.
///
/// Two pointers have equal keys exactly when they share ownership of the
/// same object, even if they point at different parts of it. Empty
/// pointers have key 0.
pub trait OwnerKey {
    fn owner_key(&self) -> usize;
}

pub(crate) fn owner_addr(cb: Option<NonNull<ErasedBlock>>) -> usize {
    cb.map_or(0, |cb| cb.as_ptr().cast::<u8>().addr())
}

/// Address part of a possibly fat pointer.
pub(crate) fn thin_addr<T: ?Sized>(ptr: Option<NonNull<T>>) -> usize {
    ptr.map_or(0, |ptr| ptr.as_ptr().cast::<u8>().addr())
}
