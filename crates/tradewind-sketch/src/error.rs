//! Error types for the sketch module.

use thiserror::Error;

/// Errors that can occur constructing, combining or decoding sketches.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SketchError {
    /// A table-size exponent was outside the permitted `[0, 32)` range.
    #[error("table exponent {0} out of range [0, 32)")]
    ExponentOutOfRange(u8),

    /// The exponent list did not sum to the key width.
    #[error("table exponents sum to {0}, expected 64")]
    ExponentSumMismatch(u32),

    /// The exponent list was empty.
    #[error("sketch needs at least one table")]
    NoTables,

    /// Two sketches with different parameters were combined.
    #[error("sketch parameter mismatch: {0}")]
    ParameterMismatch(&'static str),

    /// The range filter was inverted.
    #[error("inverted key range: lower {lower:#x} > upper {upper:#x}")]
    InvertedRange {
        /// Inclusive lower bound.
        lower: u64,
        /// Inclusive upper bound.
        upper: u64,
    },

    /// A wire message ended before all declared cells were present.
    #[error("truncated sketch wire data: expected {expected} bytes, got {got}")]
    TruncatedWire {
        /// Bytes the declared parameters require.
        expected: usize,
        /// Bytes actually available.
        got: usize,
    },

    /// A wire message carried bytes past the declared cells.
    #[error("trailing bytes after sketch wire data")]
    TrailingBytes,
}

/// Result type for sketch operations.
pub type Result<T> = std::result::Result<T, SketchError>;
