//! Seam to the external asynchronous I/O executor.

use callcache_core::{IoAck, IoCommand};
use tokio::sync::mpsc;

use crate::command::CopyMessage;

/// Executes copy and touch commands outside the worker.
///
/// Dispatch is fire-and-forget: implementations must return promptly and
/// report completion later through the provided [`AckSender`], exactly once
/// per dispatched command.
pub trait IoExecutor: Send + Sync {
    /// Start executing `command`.
    fn dispatch(&self, command: IoCommand, replies: AckSender);
}

/// Return path for acknowledgements of one dispatched command.
#[derive(Debug, Clone)]
pub struct AckSender {
    mailbox: mpsc::UnboundedSender<CopyMessage>,
}

impl AckSender {
    pub(crate) const fn new(mailbox: mpsc::UnboundedSender<CopyMessage>) -> Self {
        Self { mailbox }
    }

    /// Deliver an acknowledgement. Returns `false` if the worker has stopped.
    pub fn send(&self, ack: IoAck) -> bool {
        self.mailbox.send(CopyMessage::Ack(ack)).is_ok()
    }
}
