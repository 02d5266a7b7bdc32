//! Message-driven state machine for one cache-hit copy attempt.
//!
//! # Design
//! - One worker per job per attempt; every mutation happens on the worker
//!   task, one message at a time, and handling never blocks.
//! - Suspension points are states waiting for the next message: an
//!   acknowledgement, a timeout, or an abort.
//! - The responder is consumed by the first response, so a second one cannot
//!   be sent.
//! - After a failure is reported the worker keeps draining outstanding
//!   acknowledgements so the executor never replies to a stopped recipient.

use std::collections::HashMap;
use std::iter;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use callcache_blacklist::{BlacklistCache, BlacklistKey, BlacklistStatus, WhitelistOutcome};
use callcache_core::{
    AdditionalCommands, AdditionalCommandsContext, BlacklistSkip, CALL_ROOT_KEY, CacheHitId,
    CommandSet, CopyError, CopyFailure, CopyOutputsCommand, CopyingOutputsFailedResponse,
    DestinationLayout, DestinationPlan, Duplication, DuplicationStrategy, IoAck, IoCommand,
    JobAbortedResponse, JobKey, JobResponse, JobSucceededResponse, StoragePath,
};
use callcache_events::{BlacklistKind, Event, EventBus};
use callcache_telemetry::{BlacklistAccess, BlacklistMetricPath, CopyOutcome, Metrics};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::batch::{PendingWork, Progress};
use crate::command::{CopyMessage, TimeoutTag};
use crate::io::{AckSender, IoExecutor};
use crate::plan;
use crate::{CopyAttempt, CopyServices};

pub(crate) fn spawn(
    mut worker: Worker,
    mut control: mpsc::UnboundedReceiver<CopyMessage>,
    mut internal: mpsc::UnboundedReceiver<CopyMessage>,
) {
    tokio::spawn(async move {
        let mut control_open = true;
        loop {
            let message = tokio::select! {
                message = control.recv(), if control_open => {
                    if let Some(message) = message {
                        message
                    } else {
                        control_open = false;
                        if worker.is_idle() {
                            debug!(job = %worker.job_key, "copy handle dropped before a request arrived");
                            break;
                        }
                        continue;
                    }
                }
                Some(message) = internal.recv() => message,
                else => break,
            };
            if worker.handle(message) == Flow::Stop {
                break;
            }
        }
    });
}

/// Whether the worker keeps running after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

enum State {
    Idle,
    WaitingForResponses(PendingWork),
    Failed(PendingWork),
}

struct Outstanding {
    serial: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct ReadsRecorded {
    bucket: bool,
    hit: bool,
}

pub(crate) struct Worker {
    job_key: JobKey,
    hit: CacheHitId,
    copy_attempt: u32,
    destination: DestinationLayout,
    timeout: Duration,
    executor: Arc<dyn IoExecutor>,
    duplication: Arc<dyn DuplicationStrategy>,
    additional: Arc<dyn AdditionalCommands>,
    blacklist: Option<Arc<BlacklistCache>>,
    metrics: Metrics,
    events: EventBus,
    mailbox: mpsc::UnboundedSender<CopyMessage>,
    responder: Option<oneshot::Sender<JobResponse>>,
    state: State,
    outstanding: HashMap<IoCommand, Outstanding>,
    next_serial: u64,
    source_bucket: Option<String>,
    reads_recorded: ReadsRecorded,
}

impl Worker {
    pub(crate) fn new(
        attempt: CopyAttempt,
        services: CopyServices,
        mailbox: mpsc::UnboundedSender<CopyMessage>,
        responder: oneshot::Sender<JobResponse>,
    ) -> Self {
        Self {
            job_key: attempt.job_key,
            hit: attempt.hit,
            copy_attempt: attempt.copy_attempt,
            destination: attempt.destination,
            timeout: services.timeout,
            executor: services.executor,
            duplication: services.duplication,
            additional: services.additional,
            blacklist: services.blacklist,
            metrics: services.metrics,
            events: services.events,
            mailbox,
            responder: Some(responder),
            state: State::Idle,
            outstanding: HashMap::new(),
            next_serial: 0,
            source_bucket: None,
            reads_recorded: ReadsRecorded::default(),
        }
    }

    const fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    pub(crate) fn handle(&mut self, message: CopyMessage) -> Flow {
        match message {
            CopyMessage::Abort => self.abort(),
            CopyMessage::Copy(request) => {
                if self.is_idle() {
                    self.start(request)
                } else {
                    warn!(job = %self.job_key, "ignoring copy request for an attempt already in progress");
                    Flow::Continue
                }
            }
            CopyMessage::Ack(ack) => self.on_ack(ack),
            CopyMessage::Timeout { command, tag } => self.on_timeout(command, tag),
        }
    }

    fn start(&mut self, request: CopyOutputsCommand) -> Flow {
        if self.read_status(BlacklistKey::Hit(self.hit)) == BlacklistStatus::KnownBad {
            return self.skip(BlacklistSkip::Hit(self.hit));
        }

        self.source_bucket = request
            .source_detritus
            .get(CALL_ROOT_KEY)
            .and_then(|root| StoragePath::parse(root).ok())
            .and_then(|root| root.bucket());
        if let Some(bucket) = self.source_bucket.clone()
            && self.read_status(BlacklistKey::Bucket(&bucket)) == BlacklistStatus::KnownBad
        {
            return self.skip(BlacklistSkip::Bucket(bucket));
        }

        let (source_root, plan) = match plan::build_plan(&request, &self.destination) {
            Ok(planned) => planned,
            Err(err) => return self.fail(err),
        };

        match self.duplication.duplicate(&plan.copy_pairs()) {
            Duplication::Delegate => {}
            Duplication::Completed(Ok(())) => {
                debug!(job = %self.job_key, "cached files duplicated without copying");
                return self.succeed(plan, request.return_code);
            }
            Duplication::Completed(Err(source)) => {
                return self.fail(CopyError::Duplication { source });
            }
        }

        let context = AdditionalCommandsContext {
            source_call_root: &source_root,
            source_outputs: &request.outputs,
            source_detritus: &request.source_detritus,
            plan: &plan,
        };
        let additional = match self.additional.additional_commands(&context) {
            Ok(subsets) => subsets,
            Err(source) => return self.fail(CopyError::AdditionalCommands { source }),
        };

        let first = plan.commands.clone();
        let work = PendingWork::new(iter::once(first).chain(additional), plan, request.return_code);
        let Some(subset) = work.current().cloned() else {
            let (plan, return_code) = work.into_parts();
            return self.succeed(plan, return_code);
        };
        self.dispatch(&subset);
        self.state = State::WaitingForResponses(work);
        Flow::Continue
    }

    fn on_ack(&mut self, ack: IoAck) -> Flow {
        match mem::replace(&mut self.state, State::Idle) {
            State::Idle => {
                warn!(
                    job = %self.job_key,
                    command = %ack.command(),
                    "acknowledgement arrived with no pending copy work"
                );
                self.fail(CopyError::NoPendingWork)
            }
            State::WaitingForResponses(work) => self.on_ack_waiting(work, ack),
            State::Failed(work) => self.on_ack_draining(work, ack),
        }
    }

    fn on_ack_waiting(&mut self, mut work: PendingWork, ack: IoAck) -> Flow {
        if !self.settle(ack.command()) {
            warn!(
                job = %self.job_key,
                command = %ack.command(),
                "ignoring acknowledgement for a command that is not outstanding"
            );
            self.state = State::WaitingForResponses(work);
            return Flow::Continue;
        }
        debug_assert!(work.is_current(ack.command()));

        match ack {
            IoAck::Success { command } => match work.fold(&command) {
                Progress::StillWaiting => {
                    self.state = State::WaitingForResponses(work);
                    Flow::Continue
                }
                Progress::NextSubset(next) => {
                    self.dispatch(&next);
                    self.state = State::WaitingForResponses(work);
                    Flow::Continue
                }
                Progress::AllDone => {
                    self.whitelist_attempt();
                    let (plan, return_code) = work.into_parts();
                    self.succeed(plan, return_code)
                }
            },
            IoAck::Failure { command, cause } => {
                self.blacklist(BlacklistKey::Hit(self.hit));
                let folded = command.clone();
                self.fail_draining(
                    work,
                    &folded,
                    CopyError::CommandFailed {
                        command,
                        source: cause,
                    },
                )
            }
            IoAck::Forbidden {
                command,
                path,
                cause,
            } => {
                self.blacklist_forbidden(&path);
                let folded = command.clone();
                self.fail_draining(
                    work,
                    &folded,
                    CopyError::Forbidden {
                        command,
                        path,
                        source: cause,
                    },
                )
            }
        }
    }

    fn on_ack_draining(&mut self, work: PendingWork, ack: IoAck) -> Flow {
        if !self.settle(ack.command()) {
            self.state = State::Failed(work);
            return Flow::Continue;
        }
        if let IoAck::Forbidden { path, .. } = &ack {
            self.blacklist_forbidden(path);
        }
        self.drain(work, ack.command())
    }

    fn on_timeout(&mut self, command: IoCommand, tag: TimeoutTag) -> Flow {
        let current = self
            .outstanding
            .get(&command)
            .is_some_and(|outstanding| outstanding.serial == tag.serial);
        if tag.copy_attempt != self.copy_attempt || !current {
            debug!(job = %self.job_key, command = %command, "ignoring stale timeout");
            return Flow::Continue;
        }
        self.settle(&command);

        match mem::replace(&mut self.state, State::Idle) {
            State::Idle => Flow::Continue,
            State::WaitingForResponses(work) => {
                self.blacklist(BlacklistKey::Hit(self.hit));
                let folded = command.clone();
                self.fail_draining(work, &folded, CopyError::Timeout { command })
            }
            State::Failed(work) => {
                debug!(job = %self.job_key, command = %command, "command timed out while draining");
                self.drain(work, &command)
            }
        }
    }

    fn abort(&mut self) -> Flow {
        let response = JobResponse::Aborted(JobAbortedResponse {
            job_key: self.job_key.clone(),
        });
        if self.respond(response) {
            self.metrics.inc_copy_outcome(CopyOutcome::Aborted);
            info!(
                job = %self.job_key,
                outstanding = self.outstanding.len(),
                "cache hit copy aborted; outstanding I/O is not cancelled"
            );
        } else {
            debug!(job = %self.job_key, "abort after the response was sent");
        }
        Flow::Stop
    }

    fn dispatch(&mut self, subset: &CommandSet) {
        self.metrics.inc_commands_dispatched(subset.len());
        for command in subset {
            self.next_serial += 1;
            let tag = TimeoutTag {
                copy_attempt: self.copy_attempt,
                serial: self.next_serial,
            };
            let timer = self.schedule_timeout(command.clone(), tag);
            if let Some(previous) = self.outstanding.insert(
                command.clone(),
                Outstanding {
                    serial: tag.serial,
                    timer,
                },
            ) {
                previous.timer.abort();
            }
            debug!(job = %self.job_key, command = %command, "dispatching I/O command");
            self.executor
                .dispatch(command.clone(), AckSender::new(self.mailbox.clone()));
        }
    }

    fn schedule_timeout(&self, command: IoCommand, tag: TimeoutTag) -> JoinHandle<()> {
        let mailbox = self.mailbox.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = mailbox.send(CopyMessage::Timeout { command, tag });
        })
    }

    /// Stop tracking `command`. Returns `false` if it was not outstanding.
    fn settle(&mut self, command: &IoCommand) -> bool {
        self.outstanding.remove(command).is_some_and(|outstanding| {
            outstanding.timer.abort();
            true
        })
    }

    fn drain(&mut self, mut work: PendingWork, command: &IoCommand) -> Flow {
        match work.fold(command) {
            Progress::StillWaiting => {
                self.state = State::Failed(work);
                Flow::Continue
            }
            Progress::NextSubset(_) | Progress::AllDone => {
                debug!(job = %self.job_key, "outstanding commands drained after failure");
                Flow::Stop
            }
        }
    }

    fn fail_draining(&mut self, work: PendingWork, command: &IoCommand, error: CopyError) -> Flow {
        self.report_failure(CopyFailure::loggable(error));
        self.drain(work, command)
    }

    fn skip(&mut self, skip: BlacklistSkip) -> Flow {
        self.report_failure(CopyFailure::Metricable(skip));
        Flow::Stop
    }

    fn fail(&mut self, error: CopyError) -> Flow {
        self.report_failure(CopyFailure::loggable(error));
        Flow::Stop
    }

    fn report_failure(&mut self, error: CopyFailure) {
        match &error {
            CopyFailure::Metricable(skip) => {
                debug!(job = %self.job_key, hit = %self.hit, reason = %skip, "cache hit copy skipped");
                self.metrics.inc_copy_outcome(CopyOutcome::Skipped);
            }
            CopyFailure::Loggable(err) => {
                let cause = std::error::Error::source(err.as_ref())
                    .map_or_else(|| "none".to_string(), ToString::to_string);
                warn!(
                    job = %self.job_key,
                    hit = %self.hit,
                    attempt = self.copy_attempt,
                    error = %err,
                    cause = %cause,
                    "cache hit copy failed"
                );
                self.metrics.inc_copy_outcome(CopyOutcome::Failed);
                self.events.publish(Event::CacheCopyFailed {
                    job: self.job_key.to_string(),
                    hit: self.hit.0,
                    attempt: self.copy_attempt,
                    message: err.to_string(),
                });
            }
        }
        self.respond(JobResponse::CopyFailed(CopyingOutputsFailedResponse {
            job_key: self.job_key.clone(),
            attempt: self.copy_attempt,
            error,
        }));
    }

    fn succeed(&mut self, plan: DestinationPlan, return_code: Option<i32>) -> Flow {
        let DestinationPlan {
            outputs, detritus, ..
        } = plan;
        self.events.publish(Event::CacheCopySucceeded {
            job: self.job_key.to_string(),
            hit: self.hit.0,
            detritus: detritus
                .iter()
                .map(|(key, path)| (key.clone(), path.to_string()))
                .collect(),
        });
        self.metrics.inc_copy_outcome(CopyOutcome::Succeeded);
        info!(job = %self.job_key, hit = %self.hit, "cache hit copy succeeded");
        self.respond(JobResponse::Succeeded(JobSucceededResponse {
            job_key: self.job_key.clone(),
            return_code,
            copied_outputs: outputs,
            copied_detritus: detritus,
        }));
        Flow::Stop
    }

    /// Send the terminal response. Returns `false` if one was already sent.
    fn respond(&mut self, response: JobResponse) -> bool {
        let Some(responder) = self.responder.take() else {
            return false;
        };
        if responder.send(response).is_err() {
            debug!(job = %self.job_key, "copy response receiver dropped");
        }
        true
    }

    fn read_status(&mut self, key: BlacklistKey<'_>) -> BlacklistStatus {
        let Some(cache) = &self.blacklist else {
            return BlacklistStatus::Unknown;
        };
        let status = cache.status(key);
        let recorded = match key {
            BlacklistKey::Bucket(_) => &mut self.reads_recorded.bucket,
            BlacklistKey::Hit(_) => &mut self.reads_recorded.hit,
        };
        if !*recorded {
            *recorded = true;
            self.record(BlacklistAccess::Read, key, status);
        }
        status
    }

    fn blacklist(&self, key: BlacklistKey<'_>) {
        let Some(cache) = &self.blacklist else {
            return;
        };
        if cache.blacklist(key) {
            self.record(BlacklistAccess::Write, key, BlacklistStatus::KnownBad);
            self.events.publish(Event::Blacklisted {
                job: self.job_key.to_string(),
                kind: match key {
                    BlacklistKey::Bucket(_) => BlacklistKind::Bucket,
                    BlacklistKey::Hit(_) => BlacklistKind::Hit,
                },
                key: key.to_string(),
            });
        }
    }

    /// Hit first: not every configuration blacklists buckets.
    fn blacklist_forbidden(&self, path: &str) {
        self.blacklist(BlacklistKey::Hit(self.hit));
        match StoragePath::parse(path).map(|denied| denied.bucket()) {
            Ok(Some(bucket)) => self.blacklist(BlacklistKey::Bucket(&bucket)),
            Ok(None) => {}
            Err(err) => {
                debug!(job = %self.job_key, path, error = %err, "denied path has no bucket");
            }
        }
    }

    fn whitelist_attempt(&self) {
        self.whitelist(BlacklistKey::Hit(self.hit));
        if let Some(bucket) = &self.source_bucket {
            self.whitelist(BlacklistKey::Bucket(bucket));
        }
    }

    fn whitelist(&self, key: BlacklistKey<'_>) {
        let Some(cache) = &self.blacklist else {
            return;
        };
        if cache.whitelist(key) == WhitelistOutcome::Promoted {
            self.record(BlacklistAccess::Write, key, BlacklistStatus::KnownGood);
        }
    }

    fn record(&self, access: BlacklistAccess, key: BlacklistKey<'_>, status: BlacklistStatus) {
        let label = key.to_string();
        self.metrics.record_blacklist(&BlacklistMetricPath {
            access,
            kind: key.kind(),
            job: self.job_key.job_name(),
            group: self.blacklist.as_ref().and_then(|cache| cache.group()),
            key: &label,
            status: status.as_str(),
        });
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        for outstanding in self.outstanding.values() {
            outstanding.timer.abort();
        }
    }
}
