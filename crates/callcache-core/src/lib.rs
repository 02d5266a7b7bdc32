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

//! Backend-agnostic call-cache copy protocol: paths, values, commands, and responses.
//!
//! Layout: `path.rs` (storage paths and bucket derivation), `model/` (request,
//! response and I/O command types), `service/` (backend strategy seams),
//! `error.rs` (`CopyError`).

pub mod error;
pub mod model;
pub mod path;
pub mod service;

pub use error::{BoxedCause, CopyError, CopyResult};
pub use model::{
    BlacklistSkip, CALL_ROOT_KEY, CacheHitId, CommandSet, CopyFailure, CopyOutputsCommand, CopyPair,
    CopyingOutputsFailedResponse, DestinationLayout, DestinationPlan, IoAck, IoCommand,
    JobAbortedResponse, JobKey, JobResponse, JobSucceededResponse, OutputValue,
};
pub use path::StoragePath;
pub use service::{
    AdditionalCommands, AdditionalCommandsContext, DefaultDuplication, Duplication,
    DuplicationStrategy, NoAdditionalCommands,
};
