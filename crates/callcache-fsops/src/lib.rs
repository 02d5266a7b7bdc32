//! Link-based duplication of cached files on the local filesystem.
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

pub mod error;
pub mod link;

pub use error::{FsOpsError, FsOpsResult};
pub use link::{LinkDuplication, LinkStrategy};
