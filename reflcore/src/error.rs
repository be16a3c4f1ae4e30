//! Error types for profile range selection.

use thiserror::Error;

/// Result type for range-selection operations
pub type SelectionResult<T> = Result<T, SelectionError>;

/// Errors that can occur while selecting ranges on a count profile
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectionError {
    /// Profile too short to differentiate
    #[error("profile has {len} point(s), need at least 2 to differentiate")]
    InvalidInput { len: usize },

    /// A required divisor evaluated to zero
    #[error("degenerate profile: {0}")]
    DegenerateInput(String),
}
