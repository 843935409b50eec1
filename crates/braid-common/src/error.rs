//! Error types for braid.

use thiserror::Error;

/// Result type alias using BraidError.
pub type Result<T> = std::result::Result<T, BraidError>;

/// Errors that can occur in braid operations.
#[derive(Debug, Error)]
pub enum BraidError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    // Argument errors
    #[error("zero value is reserved: 0 marks an absent key")]
    ZeroValue,

    #[error("invalid page size {page_size}: fan-out must be even and fit in 16 bits")]
    InvalidPageSize { page_size: usize },

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    // Page errors
    #[error("corrupt page at address {address}: {reason}")]
    CorruptPage { address: i32, reason: String },
}

impl BraidError {
    /// Shorthand for a corrupt-page error.
    pub fn corrupt(address: i32, reason: impl Into<String>) -> Self {
        BraidError::CorruptPage {
            address,
            reason: reason.into(),
        }
    }
}
