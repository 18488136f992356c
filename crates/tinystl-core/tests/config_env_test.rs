//! Environment-driven mode resolution.
//!
//! Kept as the only test in this binary: it sets `TINYSTL_MODE` before the
//! level is first read, and the process-wide level is resolved only once.

#![allow(unsafe_code)]

use std::sync::{Arc, Barrier};
use std::thread;

use tinystl_core::config::{MODE_ENV_VAR, PoolConfig, SafetyLevel, safety_level};
use tinystl_core::malloc::{PoolState, SimulatedHeap};

#[test]
fn hardened_env_is_seen_by_every_racing_thread() {
    // SAFETY: no other thread of this test binary exists yet.
    unsafe { std::env::set_var(MODE_ENV_VAR, "hardened") };

    const THREADS: usize = 8;
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (safety_level(), PoolConfig::default().level)
            })
        })
        .collect();

    for handle in handles {
        let (level, config_level) = handle.join().unwrap();
        assert_eq!(level, SafetyLevel::Hardened);
        assert_eq!(config_level, SafetyLevel::Hardened);
    }

    // Resolved once: later changes to the variable are not observed.
    // SAFETY: all spawned threads have been joined.
    unsafe { std::env::set_var(MODE_ENV_VAR, "strict") };
    assert_eq!(safety_level(), SafetyLevel::Hardened);
    let pool = PoolState::new(SimulatedHeap::unlimited());
    assert_eq!(pool.level(), SafetyLevel::Hardened);
}
