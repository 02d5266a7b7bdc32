//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Blacklist reads and writes are traced under the hierarchical tag path
//!   `job.callcaching.blacklist.<access>.<kind>.<job>.<group>.<key>.<status>`.
//! - The counter family drops the `key` segment: hit ids are unbounded and a
//!   label combination is never released once seen.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use serde::Serialize;
use tracing::trace;

const BLACKLIST_PATH_PREFIX: &str = "job.callcaching.blacklist";
const NO_GROUP: &str = "none";

/// Whether a blacklist entry was consulted or changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistAccess {
    /// Status lookup.
    Read,
    /// Blacklist or whitelist write.
    Write,
}

impl BlacklistAccess {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// One blacklist metric observation.
#[derive(Debug, Clone, Copy)]
pub struct BlacklistMetricPath<'a> {
    /// Read or write.
    pub access: BlacklistAccess,
    /// `bucket` or `hit`.
    pub kind: &'a str,
    /// Job name of the copy attempt.
    pub job: &'a str,
    /// Blacklist group, if the cache is grouped.
    pub group: Option<&'a str>,
    /// Bucket prefix or hit identifier.
    pub key: &'a str,
    /// Status observed or written.
    pub status: &'a str,
}

impl BlacklistMetricPath<'_> {
    /// Path segments in emission order.
    #[must_use]
    pub fn segments(&self) -> [&str; 6] {
        [
            self.access.as_str(),
            self.kind,
            self.job,
            self.group.unwrap_or(NO_GROUP),
            self.key,
            self.status,
        ]
    }

    fn labels(&self) -> [&str; 5] {
        [
            self.access.as_str(),
            self.kind,
            self.job,
            self.group.unwrap_or(NO_GROUP),
            self.status,
        ]
    }
}

impl Display for BlacklistMetricPath<'_> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(BLACKLIST_PATH_PREFIX)?;
        for segment in self.segments() {
            write!(formatter, ".{segment}")?;
        }
        Ok(())
    }
}

/// Terminal outcome of a copy attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Files copied.
    Succeeded,
    /// Copy failed unexpectedly.
    Failed,
    /// Copy skipped because of the blacklist.
    Skipped,
    /// Copy aborted by the caller.
    Aborted,
}

impl CopyOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Aborted => "aborted",
        }
    }
}

/// Prometheus-backed metrics registry shared across copy attempts.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    blacklist_events_total: IntCounterVec,
    copy_attempts_total: IntCounterVec,
    copy_commands_dispatched_total: IntCounter,
}

/// Snapshot of selected counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Copy attempts that succeeded.
    pub copies_succeeded: u64,
    /// Copy attempts that failed unexpectedly.
    pub copies_failed: u64,
    /// Copy attempts skipped because of the blacklist.
    pub copies_skipped: u64,
    /// Copy attempts aborted by the caller.
    pub copies_aborted: u64,
    /// I/O commands handed to the executor.
    pub commands_dispatched: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let blacklist_events_total = IntCounterVec::new(
            Opts::new(
                "callcache_blacklist_events_total",
                "Blacklist cache reads and writes by store, job, group and status",
            ),
            &["access", "kind", "job", "group", "status"],
        )?;
        let copy_attempts_total = IntCounterVec::new(
            Opts::new(
                "callcache_copy_attempts_total",
                "Cache-hit copy attempts by terminal outcome",
            ),
            &["outcome"],
        )?;
        let copy_commands_dispatched_total = IntCounter::with_opts(Opts::new(
            "callcache_copy_commands_dispatched_total",
            "I/O commands dispatched for cache-hit copies",
        ))?;

        registry.register(Box::new(blacklist_events_total.clone()))?;
        registry.register(Box::new(copy_attempts_total.clone()))?;
        registry.register(Box::new(copy_commands_dispatched_total.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                blacklist_events_total,
                copy_attempts_total,
                copy_commands_dispatched_total,
            }),
        })
    }

    /// Count one blacklist read or write.
    pub fn record_blacklist(&self, path: &BlacklistMetricPath<'_>) {
        trace!(metric = %path, "blacklist metric");
        self.inner
            .blacklist_events_total
            .with_label_values(&path.labels())
            .inc();
    }

    /// Current count for the series `path` falls into; the key is not part of it.
    #[must_use]
    pub fn blacklist_count(&self, path: &BlacklistMetricPath<'_>) -> u64 {
        self.inner
            .blacklist_events_total
            .with_label_values(&path.labels())
            .get()
    }

    /// Count a terminal copy outcome.
    pub fn inc_copy_outcome(&self, outcome: CopyOutcome) {
        self.inner
            .copy_attempts_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Count I/O commands handed to the executor.
    pub fn inc_commands_dispatched(&self, count: usize) {
        self.inner
            .copy_commands_dispatched_total
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the copy counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let outcome = |outcome: CopyOutcome| {
            self.inner
                .copy_attempts_total
                .with_label_values(&[outcome.as_str()])
                .get()
        };
        MetricsSnapshot {
            copies_succeeded: outcome(CopyOutcome::Succeeded),
            copies_failed: outcome(CopyOutcome::Failed),
            copies_skipped: outcome(CopyOutcome::Skipped),
            copies_aborted: outcome(CopyOutcome::Aborted),
            commands_dispatched: self.inner.copy_commands_dispatched_total.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit_write<'a>(status: &'a str) -> BlacklistMetricPath<'a> {
        BlacklistMetricPath {
            access: BlacklistAccess::Write,
            kind: "hit",
            job: "wf.task",
            group: None,
            key: "42",
            status,
        }
    }

    #[test]
    fn blacklist_path_renders_dotted_tags() {
        assert_eq!(
            hit_write("KnownBad").to_string(),
            "job.callcaching.blacklist.write.hit.wf.task.none.42.KnownBad"
        );

        let grouped = BlacklistMetricPath {
            access: BlacklistAccess::Read,
            kind: "bucket",
            job: "wf.task",
            group: Some("project-a"),
            key: "gs://bucket-a",
            status: "KnownGood",
        };
        assert_eq!(
            grouped.to_string(),
            "job.callcaching.blacklist.read.bucket.wf.task.project-a.gs://bucket-a.KnownGood"
        );
    }

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.record_blacklist(&hit_write("KnownBad"));
        metrics.record_blacklist(&hit_write("KnownBad"));
        metrics.inc_copy_outcome(CopyOutcome::Succeeded);
        metrics.inc_copy_outcome(CopyOutcome::Skipped);
        metrics.inc_commands_dispatched(3);

        assert_eq!(metrics.blacklist_count(&hit_write("KnownBad")), 2);
        assert_eq!(metrics.blacklist_count(&hit_write("KnownGood")), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.copies_succeeded, 1);
        assert_eq!(snapshot.copies_skipped, 1);
        assert_eq!(snapshot.copies_failed, 0);
        assert_eq!(snapshot.commands_dispatched, 3);

        let rendered = metrics.render()?;
        assert!(rendered.contains("callcache_blacklist_events_total"));
        assert!(rendered.contains("callcache_copy_attempts_total"));
        Ok(())
    }

    #[test]
    fn distinct_keys_share_one_series() -> Result<()> {
        let metrics = Metrics::new()?;
        for hit in 0..500 {
            let key = hit.to_string();
            metrics.record_blacklist(&BlacklistMetricPath {
                access: BlacklistAccess::Read,
                kind: "hit",
                job: "wf.task",
                group: None,
                key: &key,
                status: "Unknown",
            });
        }

        let rendered = metrics.render()?;
        let series = rendered
            .lines()
            .filter(|line| line.starts_with("callcache_blacklist_events_total{"))
            .count();
        assert_eq!(series, 1);
        assert!(!rendered.contains("key="));
        assert_eq!(
            metrics.blacklist_count(&BlacklistMetricPath {
                access: BlacklistAccess::Read,
                kind: "hit",
                job: "wf.task",
                group: None,
                key: "anything",
                status: "Unknown",
            }),
            500
        );
        Ok(())
    }
}
