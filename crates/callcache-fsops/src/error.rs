//! # Design
//!
//! - Provide structured, constant-message errors for link-based duplication.
//! - Capture operation context (paths, strategy names) to make failures reproducible in tests.
//! - Preserve source errors without interpolating context into error messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for filesystem operations.
pub type FsOpsResult<T> = Result<T, FsOpsError>;

/// Errors produced while duplicating cached files on the local filesystem.
#[derive(Debug, Error)]
pub enum FsOpsError {
    /// IO failures while interacting with the filesystem.
    #[error("fsops io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Path is not on the local filesystem.
    #[error("fsops path is not local")]
    NonLocal {
        /// Offending path.
        path: String,
    },
    /// Strategy name could not be parsed.
    #[error("fsops invalid strategy")]
    InvalidStrategy {
        /// Offending value.
        value: String,
    },
    /// Unsupported operation on this platform.
    #[error("fsops unsupported operation")]
    Unsupported {
        /// Operation that is unsupported.
        operation: &'static str,
    },
    /// Every configured strategy failed for one file.
    #[error("fsops exhausted every duplication strategy")]
    Exhausted {
        /// Destination that could not be produced.
        destination: PathBuf,
        /// Last strategy failure.
        #[source]
        last: Box<Self>,
    },
    /// No strategy was configured.
    #[error("fsops no duplication strategy configured")]
    NoStrategies,
}

impl FsOpsError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn fsops_error_helpers_build_variants() {
        let io_err = FsOpsError::io("link.hard", "path", io::Error::other("io"));
        assert!(matches!(io_err, FsOpsError::Io { .. }));
        assert!(io_err.source().is_some());

        let exhausted = FsOpsError::Exhausted {
            destination: PathBuf::from("/dst/out.txt"),
            last: Box::new(io_err),
        };
        assert_eq!(
            exhausted.to_string(),
            "fsops exhausted every duplication strategy"
        );
        assert!(exhausted.source().is_some());
    }
}
