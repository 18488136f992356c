//! Size classes for small allocations.
//!
//! Every small request is rounded up to a multiple of [`ALIGN`]. Class `i`
//! holds blocks of exactly `(i + 1) * ALIGN` bytes, so 16 classes cover
//! 8, 16, 24, ..., 128 bytes. The rounding wastes at most 7 bytes per block
//! and keeps both the index computation and the list lookup O(1).

/// Stride between size classes, and the alignment of every pooled block.
pub const ALIGN: usize = 8;

/// Largest request served from the free lists. Above this, use the direct path.
pub const MAX_BYTES: usize = 128;

/// Number of size-class free lists.
pub const NUM_FREE_LISTS: usize = MAX_BYTES / ALIGN;

/// Blocks requested from the arena when a class list runs dry.
pub const REFILL_BATCH: usize = 20;

/// Rounds `bytes` up to the next multiple of [`ALIGN`].
///
/// # Panics
///
/// Panics on overflow, i.e. when `bytes > usize::MAX - (ALIGN - 1)`. Use
/// [`checked_round_up`] for unbounded input.
#[must_use]
pub const fn round_up(bytes: usize) -> usize {
    match checked_round_up(bytes) {
        Some(rounded) => rounded,
        None => panic!("round_up overflow"),
    }
}

/// Rounds `bytes` up to the next multiple of [`ALIGN`], or `None` if the
/// result does not fit in `usize`.
#[must_use]
pub const fn checked_round_up(bytes: usize) -> Option<usize> {
    match bytes.checked_add(ALIGN - 1) {
        Some(padded) => Some(padded & !(ALIGN - 1)),
        None => None,
    }
}

/// Returns true if a request of `bytes` bypasses the free lists.
#[must_use]
pub const fn is_large(bytes: usize) -> bool {
    bytes > MAX_BYTES
}

/// Computes the free-list index for a small request.
///
/// Zero-byte requests share class 0 with 1..=8 byte requests. Sizes above
/// [`MAX_BYTES`] return [`NUM_FREE_LISTS`] to signal the direct path.
#[must_use]
pub const fn free_list_index(bytes: usize) -> usize {
    if is_large(bytes) {
        return NUM_FREE_LISTS;
    }
    let bytes = if bytes == 0 { 1 } else { bytes };
    (bytes + ALIGN - 1) / ALIGN - 1
}

/// Returns the block size held by free list `index`, or 0 if out of range.
#[must_use]
pub const fn class_size(index: usize) -> usize {
    if index < NUM_FREE_LISTS {
        (index + 1) * ALIGN
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_classes_of_eight_bytes() {
        assert_eq!(NUM_FREE_LISTS, 16);
        assert_eq!(class_size(0), 8);
        assert_eq!(class_size(15), 128);
        assert_eq!(class_size(16), 0);
    }

    #[test]
    fn round_up_to_alignment() {
        assert_eq!(round_up(0), 0);
        assert_eq!(round_up(1), 8);
        assert_eq!(round_up(8), 8);
        assert_eq!(round_up(9), 16);
        assert_eq!(round_up(127), 128);
    }

    #[test]
    fn checked_round_up_at_the_top_of_the_range() {
        assert_eq!(checked_round_up(0), Some(0));
        assert_eq!(checked_round_up(9), Some(16));
        let top = usize::MAX & !(ALIGN - 1);
        assert_eq!(checked_round_up(top), Some(top));
        assert_eq!(checked_round_up(top + 1), None);
        assert_eq!(checked_round_up(usize::MAX), None);
    }

    #[test]
    fn index_boundaries() {
        assert_eq!(free_list_index(0), 0);
        assert_eq!(free_list_index(1), 0);
        assert_eq!(free_list_index(8), 0);
        assert_eq!(free_list_index(9), 1);
        assert_eq!(free_list_index(16), 1);
        assert_eq!(free_list_index(17), 2);
        assert_eq!(free_list_index(128), 15);
        assert_eq!(free_list_index(129), NUM_FREE_LISTS);
    }

    #[test]
    fn every_small_size_fits_its_class() {
        for n in 1..=MAX_BYTES {
            let idx = free_list_index(n);
            assert!(idx < NUM_FREE_LISTS);
            let size = class_size(idx);
            assert!(size >= n, "class {idx} ({size}) too small for {n}");
            assert!(size - n < ALIGN, "class {idx} wastes more than ALIGN for {n}");
            assert_eq!(size % ALIGN, 0);
        }
    }

    #[test]
    fn class_size_round_trips_through_index() {
        for i in 0..NUM_FREE_LISTS {
            assert_eq!(free_list_index(class_size(i)), i);
        }
    }

    #[test]
    fn large_threshold() {
        assert!(!is_large(MAX_BYTES));
        assert!(is_large(MAX_BYTES + 1));
    }
}
