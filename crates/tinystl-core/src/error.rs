//! Allocation error taxonomy.

use thiserror::Error;

/// Failure surfaced by the allocation paths.
///
/// Precondition violations (double free, mismatched size, foreign pointer)
/// are deliberately absent: they are unchecked in strict mode and abort in
/// hardened mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The direct allocation path failed and no out-of-memory handler is
    /// installed.
    #[error("out of memory: allocation of {bytes} bytes failed")]
    OutOfMemory { bytes: usize },
    /// `count * elem_size` does not fit in `usize`.
    #[error("capacity overflow: {count} elements of {elem_size} bytes")]
    CapacityOverflow { count: usize, elem_size: usize },
}

impl AllocError {
    /// Byte count of the failed request, if it is known.
    #[must_use]
    pub fn requested_bytes(&self) -> Option<usize> {
        match *self {
            Self::OutOfMemory { bytes } => Some(bytes),
            Self::CapacityOverflow { .. } => None,
        }
    }
}
