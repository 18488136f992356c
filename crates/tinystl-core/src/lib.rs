//! # tinystl-core
//!
//! Safe allocation policy for tinystl.
//!
//! This crate owns every decision the pooled allocator makes: size-class
//! rounding, per-class free lists, batch refills, arena carving and growth,
//! scavenging, and the fallback to the direct allocation path. It never
//! touches memory. Blocks are plain addresses handed out by a
//! [`malloc::SystemHeap`]; the `tinystl-mem` crate plugs in a heap backed by
//! the real system allocator, tests plug in [`malloc::SimulatedHeap`].
//!
//! No `unsafe` code is permitted at the crate level.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod malloc;

pub use config::{PoolConfig, SafetyLevel, safety_level};
pub use error::AllocError;
