#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Copies the outputs of a call-cache hit into a new job's call root.
//!
//! Each attempt runs in its own worker task. Callers drive it through a
//! [`CacheHitCopyHandle`]; the I/O executor replies through an [`AckSender`].

/// Ordered command subsets and their completion tracking.
pub mod batch;
/// Messages accepted by a copy worker.
pub mod command;
/// Handle-level error types.
pub mod error;
/// I/O executor seam.
pub mod io;
/// Destination planning for outputs and side files.
pub mod plan;
mod worker;

pub use batch::{PendingWork, Progress};
pub use command::{CopyMessage, TimeoutTag};
pub use error::CopyHandleError;
pub use io::{AckSender, IoExecutor};

use std::sync::Arc;
use std::time::Duration;

use callcache_blacklist::BlacklistCache;
use callcache_config::CopyConfig;
use callcache_core::{
    AdditionalCommands, CacheHitId, CopyOutputsCommand, DefaultDuplication, DestinationLayout,
    DuplicationStrategy, JobKey, JobResponse, NoAdditionalCommands,
};
use callcache_events::EventBus;
use callcache_telemetry::Metrics;
use tokio::sync::{mpsc, oneshot};

/// Identity and destination of one cache-copy attempt.
#[derive(Debug, Clone)]
pub struct CopyAttempt {
    /// Job receiving the copied outputs.
    pub job_key: JobKey,
    /// Cache hit being copied.
    pub hit: CacheHitId,
    /// Which cache-copy attempt of the job this is; stale timeouts carry older values.
    pub copy_attempt: u32,
    /// Where the job's call root and side files live.
    pub destination: DestinationLayout,
}

/// Collaborators shared by copy workers.
#[derive(Clone)]
pub struct CopyServices {
    pub(crate) executor: Arc<dyn IoExecutor>,
    pub(crate) duplication: Arc<dyn DuplicationStrategy>,
    pub(crate) additional: Arc<dyn AdditionalCommands>,
    pub(crate) blacklist: Option<Arc<BlacklistCache>>,
    pub(crate) metrics: Metrics,
    pub(crate) events: EventBus,
    pub(crate) timeout: Duration,
}

impl CopyServices {
    /// Services that copy through `executor` with no backend overrides and no blacklist.
    #[must_use]
    pub fn new(
        executor: Arc<dyn IoExecutor>,
        config: &CopyConfig,
        metrics: Metrics,
        events: EventBus,
    ) -> Self {
        Self {
            executor,
            duplication: Arc::new(DefaultDuplication),
            additional: Arc::new(NoAdditionalCommands),
            blacklist: None,
            metrics,
            events,
            timeout: config.timeout(),
        }
    }

    /// Replace the duplication override.
    #[must_use]
    pub fn with_duplication(mut self, duplication: Arc<dyn DuplicationStrategy>) -> Self {
        self.duplication = duplication;
        self
    }

    /// Replace the additional-commands hook.
    #[must_use]
    pub fn with_additional_commands(mut self, additional: Arc<dyn AdditionalCommands>) -> Self {
        self.additional = additional;
        self
    }

    /// Consult and update `blacklist`; `None` disables blacklisting.
    #[must_use]
    pub fn with_blacklist(mut self, blacklist: Option<Arc<BlacklistCache>>) -> Self {
        self.blacklist = blacklist;
        self
    }
}

/// Start a worker for one copy attempt.
///
/// The worker waits for [`CacheHitCopyHandle::copy`]. Must be called from
/// within a Tokio runtime.
#[must_use]
pub fn spawn(attempt: CopyAttempt, services: CopyServices) -> CacheHitCopyHandle {
    let (control, control_rx) = mpsc::unbounded_channel();
    let (mailbox, internal_rx) = mpsc::unbounded_channel();
    let (responder, response) = oneshot::channel();
    let job_key = attempt.job_key.clone();

    let worker = worker::Worker::new(attempt, services, mailbox, responder);
    worker::spawn(worker, control_rx, internal_rx);

    CacheHitCopyHandle {
        control,
        response,
        job_key,
    }
}

/// Caller side of a copy worker.
#[derive(Debug)]
pub struct CacheHitCopyHandle {
    control: mpsc::UnboundedSender<CopyMessage>,
    response: oneshot::Receiver<JobResponse>,
    job_key: JobKey,
}

impl CacheHitCopyHandle {
    /// Ask the worker to copy the cache hit described by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`CopyHandleError::WorkerStopped`] if the worker has already stopped.
    pub fn copy(&self, request: CopyOutputsCommand) -> Result<(), CopyHandleError> {
        self.control
            .send(CopyMessage::Copy(request))
            .map_err(|_| CopyHandleError::WorkerStopped { operation: "copy" })
    }

    /// Abort the attempt. Outstanding I/O is not cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`CopyHandleError::WorkerStopped`] if the worker has already stopped.
    pub fn abort(&self) -> Result<(), CopyHandleError> {
        self.control
            .send(CopyMessage::Abort)
            .map_err(|_| CopyHandleError::WorkerStopped { operation: "abort" })
    }

    /// Job the attempt belongs to.
    #[must_use]
    pub const fn job_key(&self) -> &JobKey {
        &self.job_key
    }

    /// Wait for the single terminal response.
    ///
    /// # Errors
    ///
    /// Returns [`CopyHandleError::NoResponse`] if the worker stopped without answering.
    pub async fn response(self) -> Result<JobResponse, CopyHandleError> {
        self.response.await.map_err(|_| CopyHandleError::NoResponse)
    }
}
