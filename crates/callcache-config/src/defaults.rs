//! Default values for configuration sections.
//!
//! # Design
//! - Centralize defaults so `Default` impls and documentation stay consistent.

/// Per-command I/O timeout in seconds.
pub(crate) const COPY_TIMEOUT_SECS: u64 = 300;
/// Maximum number of cache hits remembered per blacklist cache.
pub(crate) const HIT_CACHE_SIZE: usize = 20_000;
/// Maximum number of buckets remembered per blacklist cache.
pub(crate) const BUCKET_CACHE_SIZE: usize = 1_000;
/// Expected number of concurrent writers per store.
pub(crate) const STORE_CONCURRENCY: usize = 10_000;
/// Lifetime of a blacklist entry, measured from its last write.
pub(crate) const STORE_TTL_SECS: u64 = 3_600;
/// Maximum number of blacklist groups kept alive.
pub(crate) const GROUPINGS_SIZE: usize = 1_000;
/// Lifetime of an idle blacklist group.
pub(crate) const GROUPINGS_TTL_SECS: u64 = 7_200;
/// Log level used when none is configured.
pub(crate) const LOG_LEVEL: &str = "info";
