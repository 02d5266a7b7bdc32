//! # Design
//!
//! - Errors raised by the copy handle itself, not by the copy attempt.
//! - Keep error messages constant; store operational context in fields.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Failures talking to a copy worker.
pub enum CopyHandleError {
    /// The worker has already stopped and cannot accept messages.
    WorkerStopped {
        /// Operation that could not be delivered.
        operation: &'static str,
    },
    /// The worker stopped without sending a response.
    NoResponse,
}

impl Display for CopyHandleError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerStopped { operation } => {
                let _ = operation;
                formatter.write_str("copy worker stopped")
            }
            Self::NoResponse => formatter.write_str("copy worker stopped without responding"),
        }
    }
}

impl Error for CopyHandleError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_constant() {
        let stopped = CopyHandleError::WorkerStopped { operation: "copy" };
        assert_eq!(stopped.to_string(), "copy worker stopped");
        assert_eq!(
            CopyHandleError::NoResponse.to_string(),
            "copy worker stopped without responding"
        );
    }
}
