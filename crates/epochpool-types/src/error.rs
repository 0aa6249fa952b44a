//! Type conversion error types.

use thiserror::Error;

/// Errors that can occur while converting or binding values.
#[derive(Debug, Error)]
pub enum TypeError {
    /// Value is null when non-null was expected.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// Type mismatch during conversion.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Actual type name.
        actual: &'static str,
    },

    /// Value is out of range for target type.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target type name.
        target_type: &'static str,
    },

    /// Column index does not exist in the row.
    #[error("column index {index} out of bounds (row has {len} columns)")]
    ColumnIndex {
        /// Requested zero-based index.
        index: usize,
        /// Number of columns in the row.
        len: usize,
    },

    /// Placeholder index is not valid (binding is 1-indexed).
    #[error("invalid parameter index {0}: placeholders are numbered from 1")]
    ParameterIndex(usize),
}
