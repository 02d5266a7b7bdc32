//! Strategy seams through which a storage backend customises cache-hit copying.

use std::collections::BTreeMap;

use crate::error::BoxedCause;
use crate::model::{CommandSet, CopyPair, DestinationPlan, OutputValue};
use crate::path::StoragePath;

/// Outcome of offering a copy set to a duplication strategy.
#[derive(Debug)]
pub enum Duplication {
    /// The strategy does not duplicate; hand the commands to the I/O executor.
    Delegate,
    /// The strategy duplicated synchronously with this result.
    Completed(Result<(), BoxedCause>),
}

/// Backend override for how cached files are duplicated (links instead of copies).
pub trait DuplicationStrategy: Send + Sync {
    /// Duplicate every pair, or decline with [`Duplication::Delegate`].
    fn duplicate(&self, pairs: &[CopyPair]) -> Duplication;
}

/// Always delegates to the I/O executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDuplication;

impl DuplicationStrategy for DefaultDuplication {
    fn duplicate(&self, pairs: &[CopyPair]) -> Duplication {
        let _ = pairs;
        Duplication::Delegate
    }
}

/// Inputs available to a backend contributing extra command subsets.
#[derive(Debug, Clone, Copy)]
pub struct AdditionalCommandsContext<'a> {
    /// Root directory of the cached job.
    pub source_call_root: &'a StoragePath,
    /// Outputs as recorded for the cached job.
    pub source_outputs: &'a BTreeMap<String, OutputValue>,
    /// Side files as recorded for the cached job.
    pub source_detritus: &'a BTreeMap<String, String>,
    /// Destination view built for the new job.
    pub plan: &'a DestinationPlan,
}

/// Backend hook contributing command subsets that must run after the copies.
pub trait AdditionalCommands: Send + Sync {
    /// Ordered subsets to run once the first subset has fully completed.
    ///
    /// # Errors
    ///
    /// Returns the backend's failure when the subsets cannot be built.
    fn additional_commands(
        &self,
        context: &AdditionalCommandsContext<'_>,
    ) -> Result<Vec<CommandSet>, BoxedCause>;
}

/// Contributes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAdditionalCommands;

impl AdditionalCommands for NoAdditionalCommands {
    fn additional_commands(
        &self,
        context: &AdditionalCommandsContext<'_>,
    ) -> Result<Vec<CommandSet>, BoxedCause> {
        let _ = context;
        Ok(Vec::new())
    }
}
