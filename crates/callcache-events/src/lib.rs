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

//! In-process event bus for call-cache copy metadata.
//!
//! The bus provides a typed event enum, sequential identifiers, and replay of
//! recent events for subscribers that attach late. Internally it uses
//! `tokio::broadcast` with a bounded buffer; when the channel overflows, the
//! oldest events are dropped. Publishing never blocks and never fails, so
//! emitters can treat it as fire-and-forget.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};

/// Identifier assigned to each published event.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Which blacklist store an entry was written to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistKind {
    /// Keyed by storage-location prefix.
    Bucket,
    /// Keyed by cache hit.
    Hit,
}

impl BlacklistKind {
    /// Lower-case label used in logs and metric paths.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::Hit => "hit",
        }
    }
}

/// Typed events emitted by copy attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A cache hit was copied for a job.
    CacheCopySucceeded {
        /// Job the files were copied for.
        job: String,
        /// Cache hit the files came from.
        hit: i64,
        /// Side files at their destination paths.
        detritus: BTreeMap<String, String>,
    },
    /// A copy attempt failed unexpectedly.
    CacheCopyFailed {
        /// Job the copy was attempted for.
        job: String,
        /// Cache hit that was being copied.
        hit: i64,
        /// Cache-copy attempt number.
        attempt: u32,
        /// Rendered failure.
        message: String,
    },
    /// A bucket or hit was marked as known bad.
    Blacklisted {
        /// Job whose failure caused the write.
        job: String,
        /// Store the entry belongs to.
        kind: BlacklistKind,
        /// Bucket prefix or hit identifier.
        key: String,
    },
}

impl Event {
    /// Machine-friendly discriminator for consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CacheCopySucceeded { .. } => "cache_copy_succeeded",
            Self::CacheCopyFailed { .. } => "cache_copy_failed",
            Self::Blacklisted { .. } => "blacklisted",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Time of publication.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer, ensuring dropped events impact both structures consistently.
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.buffer.lock();
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.buffer.lock();
            backlog.extend(buffer.iter().filter(|item| item.id > since).cloned());
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.buffer.lock().back().map(|event| event.id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => self.receiver.recv().await.ok(),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blacklisted(index: usize) -> Event {
        Event::Blacklisted {
            job: "wf.task:NA:1".to_string(),
            kind: BlacklistKind::Hit,
            key: index.to_string(),
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(blacklisted(i));
        }
        assert_eq!(last_id, 5);
        assert_eq!(bus.last_event_id(), Some(5));

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event.id);
            }
        }
        assert_eq!(received, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn replay_buffer_drops_oldest() {
        let bus = EventBus::with_capacity(2);
        for i in 0..4 {
            bus.publish(blacklisted(i));
        }

        let mut stream = bus.subscribe(Some(0));
        assert_eq!(stream.next().await.map(|event| event.id), Some(3));
        assert_eq!(stream.next().await.map(|event| event.id), Some(4));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        let id = bus.publish(Event::CacheCopySucceeded {
            job: "wf.task:NA:1".to_string(),
            hit: 7,
            detritus: BTreeMap::new(),
        });
        assert_eq!(id, 1);

        let mut live = bus.subscribe(None);
        bus.publish(blacklisted(0));
        let envelope = live.next().await;
        assert_eq!(envelope.map(|event| event.event.kind()), Some("blacklisted"));
    }

    #[test]
    fn events_serialise_with_type_tag() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(blacklisted(42))?;
        assert_eq!(json["type"], "blacklisted");
        assert_eq!(json["kind"], "hit");
        assert_eq!(json["key"], "42");
        Ok(())
    }
}
