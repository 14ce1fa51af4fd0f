//! Error types for the structured Krylov engines.

use thiserror::Error;

/// Precondition violations reported by every engine entry point.
///
/// All of these are detected before the recursion starts. None of them is
/// transient: calling again with the same arguments fails the same way.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KrylovError {
    /// Two arguments disagree on the problem size `n`.
    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The problem size is not a power of two (this includes `n = 0`).
    #[error("Size must be a power of two, got n = {n}")]
    NonPowerOfTwoSize { n: usize },

    /// Rank or batch size disagree between two arguments.
    #[error("Rank/batch mismatch for {what}: expected {expected}, got {actual}")]
    RankOrBatchMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A non-finite value was found while `check_finite` is enabled.
    #[error("Non-finite value in {argument} at flat index {index}")]
    NumericOverflow {
        argument: &'static str,
        index: usize,
    },
}
