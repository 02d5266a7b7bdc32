//! Telemetry primitives shared across the call-cache workspace.
//!
//! This crate centralises logging initialisation and the Prometheus metrics
//! registry, including the blacklist tag paths emitted by copy attempts.

pub mod init;
pub mod metrics;

pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{BlacklistAccess, BlacklistMetricPath, CopyOutcome, Metrics, MetricsSnapshot};
