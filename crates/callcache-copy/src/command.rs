//! Messages accepted by a copy worker.

use callcache_core::{CopyOutputsCommand, IoAck, IoCommand};

/// Identity of one dispatch of a command, carried by its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutTag {
    /// Cache-copy attempt that scheduled the timeout.
    pub copy_attempt: u32,
    /// Per-worker dispatch serial.
    pub serial: u64,
}

/// Inbound mailbox message of a copy worker.
#[derive(Debug)]
pub enum CopyMessage {
    /// Start copying a cache hit.
    Copy(CopyOutputsCommand),
    /// Stop the attempt and answer with an aborted response.
    Abort,
    /// Completion of a dispatched I/O command.
    Ack(IoAck),
    /// No acknowledgement arrived for `command` within the configured timeout.
    Timeout {
        /// Command that timed out.
        command: IoCommand,
        /// Dispatch the timeout belongs to.
        tag: TimeoutTag,
    },
}
