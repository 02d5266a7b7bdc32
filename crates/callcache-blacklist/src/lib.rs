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

//! Bounded, expiring reputation cache for buckets and cache hits.
//!
//! Layout: `store.rs` (lock-striped LRU store with TTL), `cache.rs`
//! (`BlacklistCache` tri-state semantics), `registry.rs` (sharing caches per
//! group or workflow), `error.rs` (`BlacklistError`).

pub mod cache;
pub mod error;
pub mod registry;
pub mod store;

pub use cache::{BlacklistCache, BlacklistKey, BlacklistStatus, WhitelistOutcome};
pub use error::{BlacklistError, BlacklistResult};
pub use registry::BlacklistRegistry;
pub use store::ExpiringStore;
