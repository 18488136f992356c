//! Shared workloads for the tinystl benchmarks.

/// Deterministic request sizes for allocator benchmarks.
///
/// A xorshift stream mapped into `1..=max`, so every run replays the same
/// mix of size classes.
pub fn size_trace(seed: u64, len: usize, max: usize) -> Vec<usize> {
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            1 + (state % max.max(1) as u64) as usize
        })
        .collect()
}
