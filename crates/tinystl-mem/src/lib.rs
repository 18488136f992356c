//! # tinystl-mem
//!
//! Real-memory side of tinystl: the pooled allocation policy from
//! `tinystl-core` bound to the system allocator, a typed allocator facade,
//! and the `SharedPtr` / `WeakPtr` / `UniquePtr` family built on top of it.
//!
//! ```
//! use tinystl_mem::smart::{SharedPtr, UniquePtr};
//!
//! let owner = SharedPtr::new(String::from("pooled"));
//! let observer = owner.downgrade();
//! assert_eq!(observer.lock().as_str(), "pooled");
//! drop(owner);
//! assert!(observer.expired());
//!
//! let unique = UniquePtr::new(41u32);
//! let shared: SharedPtr<u32> = unique.into();
//! assert_eq!(*shared + 1, 42);
//! ```

pub mod direct;
pub mod global;
pub mod pool;
pub mod smart;
pub mod typed;

pub use direct::DirectAllocator;
pub use global::{default_pool, default_pool_stats, drain_lifecycle_logs, set_malloc_handler};
pub use pool::PoolAllocator;
pub use smart::{BadWeakPtr, EnableSharedFromThis, SharedFromThis, SharedPtr, UniquePtr, WeakPtr};
pub use tinystl_core::AllocError;
pub use typed::{
    DefaultPool, RawAllocator, SystemAlloc, TypedAllocator, construct, destroy, destroy_n,
};
