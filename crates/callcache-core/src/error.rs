//! Error types for cache-hit copy attempts.

use std::error::Error;

use thiserror::Error;

use crate::model::IoCommand;

/// Boxed cause reported by an external collaborator.
pub type BoxedCause = Box<dyn Error + Send + Sync>;

/// Unexpected failures of a copy attempt. Every variant is logged and reported.
#[derive(Debug, Error)]
pub enum CopyError {
    /// A path could not be parsed or resolved.
    #[error("invalid storage path '{value}': {reason}")]
    InvalidPath {
        /// Offending path value.
        value: String,
        /// Machine-readable reason for the rejection.
        reason: &'static str,
    },
    /// The source side-file mapping did not carry the call root.
    #[error("source side files do not include the call root entry '{key}'")]
    MissingCallRoot {
        /// Identifier that was expected.
        key: &'static str,
    },
    /// A backend hook failed while contributing additional command subsets.
    #[error("failed to build additional copy commands")]
    AdditionalCommands {
        /// Underlying hook failure.
        #[source]
        source: BoxedCause,
    },
    /// The duplication override reported failure.
    #[error("duplication of cached files failed, likely a permission problem")]
    Duplication {
        /// Underlying duplication failure.
        #[source]
        source: BoxedCause,
    },
    /// The I/O executor failed a command.
    #[error("{command} failed")]
    CommandFailed {
        /// Command that failed.
        command: IoCommand,
        /// Underlying executor failure.
        #[source]
        source: BoxedCause,
    },
    /// The I/O executor was denied access to a path.
    #[error("{command} was denied access to '{path}'")]
    Forbidden {
        /// Command that failed.
        command: IoCommand,
        /// Path the denial was reported for.
        path: String,
        /// Underlying executor failure.
        #[source]
        source: BoxedCause,
    },
    /// No acknowledgement arrived within the configured timeout.
    #[error("{command} timed out")]
    Timeout {
        /// Command that timed out.
        command: IoCommand,
    },
    /// An acknowledgement arrived while no work was outstanding.
    #[error("received an I/O acknowledgement with no pending copy work")]
    NoPendingWork,
}

impl CopyError {
    pub(crate) fn invalid_path(value: &str, reason: &'static str) -> Self {
        Self::InvalidPath {
            value: value.to_string(),
            reason,
        }
    }
}

/// Convenience alias for copy results.
pub type CopyResult<T> = Result<T, CopyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoragePath;
    use std::io;

    #[test]
    fn timeout_message_names_the_operation() -> CopyResult<()> {
        let copy = IoCommand::copy(
            StoragePath::parse("/src/run1/out.txt")?,
            StoragePath::parse("/dst/run2/out.txt")?,
        );
        let err = CopyError::Timeout { command: copy };
        assert_eq!(
            err.to_string(),
            "copy of /src/run1/out.txt to /dst/run2/out.txt timed out"
        );

        let touch = IoCommand::touch(StoragePath::parse("gs://bucket-a/marker")?);
        let err = CopyError::Timeout { command: touch };
        assert_eq!(err.to_string(), "touch of gs://bucket-a/marker timed out");
        Ok(())
    }

    #[test]
    fn executor_failures_keep_their_source() -> CopyResult<()> {
        let command = IoCommand::touch(StoragePath::parse("/tmp/x")?);
        let err = CopyError::Forbidden {
            command,
            path: "/tmp/x".to_string(),
            source: Box::new(io::Error::other("403")),
        };
        assert_eq!(
            err.source().map(ToString::to_string).as_deref(),
            Some("403")
        );
        Ok(())
    }
}
