//! Common error types for the RTC task controller crates.

use thiserror::Error;

/// Errors raised by shared types before they reach a service boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Extension record failed validation
    #[error("Invalid extension record: {0}")]
    InvalidExtension(String),

    /// Identifier could not be parsed
    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}

/// Result type alias using `CommonError`
pub type Result<T> = std::result::Result<T, CommonError>;
