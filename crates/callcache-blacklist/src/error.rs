//! Error types for blacklist cache construction.

use thiserror::Error;

/// Failures raised while building blacklist stores.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlacklistError {
    /// A store bound was zero.
    #[error("blacklist {store} {field} must be positive")]
    InvalidBound {
        /// Store being built.
        store: &'static str,
        /// Offending bound.
        field: &'static str,
    },
}

/// Convenience alias for blacklist results.
pub type BlacklistResult<T> = Result<T, BlacklistError>;
