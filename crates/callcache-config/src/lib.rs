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

//! File-backed configuration for cache-hit copying and blacklisting.
//!
//! Layout: `model.rs` (typed config sections), `validate.rs` (bounds checks),
//! `loader.rs` (JSON file + environment overrides), `defaults.rs` (default values).

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ENV_PREFIX, apply_env_overrides, load_from_path, load_from_str};
pub use model::{
    BlacklistConfig, CallCacheConfig, CopyConfig, GroupingsConfig, StoreConfig, TelemetryConfig,
};
pub use validate::validate;
