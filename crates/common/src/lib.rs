//! Common utilities and types shared across the RTC task controller crates.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for ledger identifiers
pub mod types;

/// Module for the versioned extension record attached to ledger entities
pub mod extensions;

/// Module for secret types that prevent accidental logging
pub mod secret;
