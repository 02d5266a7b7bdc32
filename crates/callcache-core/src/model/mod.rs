//! Request, response, and I/O command types exchanged by a cache-hit copy attempt.
//!
//! # Design
//! - Pure data carriers; no IO handles are embedded.
//! - I/O commands compare by value so an acknowledgement identifies the command it answers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BoxedCause, CopyError};
use crate::path::StoragePath;

/// Side-file identifier reserved for the unit of work's root directory.
pub const CALL_ROOT_KEY: &str = "callRootPath";

/// Identifies one attempt of one job within a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    /// Fully qualified call name.
    pub call_fqn: String,
    /// Scatter index, when the call is scattered.
    pub index: Option<u32>,
    /// Job attempt number (starts at 1).
    pub attempt: u32,
}

impl JobKey {
    /// Build a key for an unscattered call.
    #[must_use]
    pub fn new(call_fqn: impl Into<String>, attempt: u32) -> Self {
        Self {
            call_fqn: call_fqn.into(),
            index: None,
            attempt,
        }
    }

    /// Attach a scatter index.
    #[must_use]
    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Name of the job as used in metric paths.
    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.call_fqn
    }
}

impl Display for JobKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(formatter, "{}:{}:{}", self.call_fqn, index, self.attempt),
            None => write!(formatter, "{}:NA:{}", self.call_fqn, self.attempt),
        }
    }
}

/// Identifier of a call-cache entry ("hit").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheHitId(pub i64);

impl Display for CacheHitId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// A named job output. File references are copied; scalars pass through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OutputValue {
    /// Reference to a file produced by the job.
    File(String),
    /// Opaque non-file value.
    Scalar(Value),
}

impl OutputValue {
    /// Convenience constructor for file values.
    #[must_use]
    pub fn file(path: impl Into<String>) -> Self {
        Self::File(path.into())
    }

    /// Path carried by a file value.
    #[must_use]
    pub fn as_file(&self) -> Option<&str> {
        match self {
            Self::File(path) => Some(path),
            Self::Scalar(_) => None,
        }
    }
}

/// Inbound request to copy a cache hit's outputs and side files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CopyOutputsCommand {
    /// Outputs of the cached job keyed by output name.
    pub outputs: BTreeMap<String, OutputValue>,
    /// Side files of the cached job keyed by identifier; must include [`CALL_ROOT_KEY`].
    pub source_detritus: BTreeMap<String, String>,
    /// Return code of the cached job, when one was recorded.
    pub return_code: Option<i32>,
}

/// Where the new job expects its files to live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationLayout {
    /// Root directory of the new job.
    pub call_root: StoragePath,
    /// Predetermined destination for each side-file identifier the job knows.
    pub detritus: BTreeMap<String, StoragePath>,
}

impl DestinationLayout {
    /// Layout with only a call root; side files are added with [`Self::with_detritus`].
    #[must_use]
    pub const fn new(call_root: StoragePath) -> Self {
        Self {
            call_root,
            detritus: BTreeMap::new(),
        }
    }

    /// Register the destination of a side file relative to the call root.
    #[must_use]
    pub fn with_detritus(mut self, key: impl Into<String>, file_name: &str) -> Self {
        let path = self.call_root.join([file_name]);
        self.detritus.insert(key.into(), path);
        self
    }
}

/// Set of I/O commands that may run concurrently.
pub type CommandSet = BTreeSet<IoCommand>;

/// Destination-relative view of a copy request and the commands realising it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DestinationPlan {
    /// Outputs rewritten to their destination paths.
    pub outputs: BTreeMap<String, OutputValue>,
    /// Side files mapped to their destination paths, always including the call root.
    pub detritus: BTreeMap<String, StoragePath>,
    /// Copy commands for outputs and side files.
    pub commands: CommandSet,
}

impl DestinationPlan {
    /// Source/destination pairs of every copy command in the plan.
    #[must_use]
    pub fn copy_pairs(&self) -> Vec<CopyPair> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                IoCommand::Copy {
                    source,
                    destination,
                    ..
                } => Some(CopyPair {
                    source: source.clone(),
                    destination: destination.clone(),
                }),
                IoCommand::Touch { .. } => None,
            })
            .collect()
    }
}

/// A single source to destination duplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPair {
    /// Existing file.
    pub source: StoragePath,
    /// Location the file must appear at.
    pub destination: StoragePath,
}

/// Command handed to the external I/O executor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IoCommand {
    /// Copy a file.
    Copy {
        /// File to copy.
        source: StoragePath,
        /// Target location.
        destination: StoragePath,
        /// Replace an existing destination.
        overwrite: bool,
    },
    /// Create or refresh a file.
    Touch {
        /// File to touch.
        path: StoragePath,
    },
}

impl IoCommand {
    /// Overwriting copy, the only kind the copy planner emits.
    #[must_use]
    pub const fn copy(source: StoragePath, destination: StoragePath) -> Self {
        Self::Copy {
            source,
            destination,
            overwrite: true,
        }
    }

    /// Touch command.
    #[must_use]
    pub const fn touch(path: StoragePath) -> Self {
        Self::Touch { path }
    }
}

impl Display for IoCommand {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy {
                source,
                destination,
                ..
            } => write!(formatter, "copy of {source} to {destination}"),
            Self::Touch { path } => write!(formatter, "touch of {path}"),
        }
    }
}

/// Acknowledgement returned by the I/O executor for one command.
#[derive(Debug)]
pub enum IoAck {
    /// The command completed.
    Success {
        /// Completed command.
        command: IoCommand,
    },
    /// The command failed for a reason not known to be location-wide.
    Failure {
        /// Failed command.
        command: IoCommand,
        /// Executor-reported cause.
        cause: BoxedCause,
    },
    /// The command was denied access to a specific path.
    Forbidden {
        /// Failed command.
        command: IoCommand,
        /// Path the denial applies to.
        path: String,
        /// Executor-reported cause.
        cause: BoxedCause,
    },
}

impl IoAck {
    /// Command this acknowledgement answers.
    #[must_use]
    pub const fn command(&self) -> &IoCommand {
        match self {
            Self::Success { command }
            | Self::Failure { command, .. }
            | Self::Forbidden { command, .. } => command,
        }
    }
}

/// Reason a copy attempt was skipped without touching storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlacklistSkip {
    /// The cache entry is known to fail.
    Hit(CacheHitId),
    /// The storage location of the cache entry is known to fail.
    Bucket(String),
}

impl Display for BlacklistSkip {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit(hit) => write!(formatter, "cache hit {hit} is blacklisted"),
            Self::Bucket(bucket) => write!(formatter, "bucket {bucket} is blacklisted"),
        }
    }
}

/// Error carried by a failed-copy response.
#[derive(Debug, Clone)]
pub enum CopyFailure {
    /// Expected skip; counted, never logged as a problem.
    Metricable(BlacklistSkip),
    /// Unexpected failure; logged with context.
    Loggable(Arc<CopyError>),
}

impl CopyFailure {
    /// Wrap an unexpected error.
    #[must_use]
    pub fn loggable(error: CopyError) -> Self {
        Self::Loggable(Arc::new(error))
    }
}

impl Display for CopyFailure {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metricable(skip) => Display::fmt(skip, formatter),
            Self::Loggable(error) => Display::fmt(error, formatter),
        }
    }
}

/// Terminal success: the new job now owns copies of the cached files.
#[derive(Debug, Clone)]
pub struct JobSucceededResponse {
    /// Job the copy was performed for.
    pub job_key: JobKey,
    /// Return code carried over from the cached job.
    pub return_code: Option<i32>,
    /// Outputs rewritten to their destination paths.
    pub copied_outputs: BTreeMap<String, OutputValue>,
    /// Side files at their destination paths.
    pub copied_detritus: BTreeMap<String, StoragePath>,
}

/// Terminal failure of a copy attempt.
#[derive(Debug, Clone)]
pub struct CopyingOutputsFailedResponse {
    /// Job the copy was attempted for.
    pub job_key: JobKey,
    /// Which cache-copy attempt failed.
    pub attempt: u32,
    /// Failure detail.
    pub error: CopyFailure,
}

/// Terminal response to an abort request.
#[derive(Debug, Clone)]
pub struct JobAbortedResponse {
    /// Job that was aborted.
    pub job_key: JobKey,
}

/// The single terminal response of a copy attempt.
#[derive(Debug, Clone)]
pub enum JobResponse {
    /// Copy completed.
    Succeeded(JobSucceededResponse),
    /// Copy failed or was skipped.
    CopyFailed(CopyingOutputsFailedResponse),
    /// Copy was aborted.
    Aborted(JobAbortedResponse),
}

impl JobResponse {
    /// Job the response belongs to.
    #[must_use]
    pub const fn job_key(&self) -> &JobKey {
        match self {
            Self::Succeeded(response) => &response.job_key,
            Self::CopyFailed(response) => &response.job_key,
            Self::Aborted(response) => &response.job_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CopyResult;

    #[test]
    fn job_key_display_marks_missing_index() {
        assert_eq!(JobKey::new("wf.task", 1).to_string(), "wf.task:NA:1");
        assert_eq!(
            JobKey::new("wf.task", 2).with_index(3).to_string(),
            "wf.task:3:2"
        );
    }

    #[test]
    fn layout_places_detritus_under_call_root() -> CopyResult<()> {
        let layout = DestinationLayout::new(StoragePath::parse("/dst/run2")?)
            .with_detritus("stdout", "stdout")
            .with_detritus("rc", "rc");
        assert_eq!(
            layout.detritus.get("stdout").map(ToString::to_string),
            Some("/dst/run2/stdout".to_string())
        );
        assert_eq!(layout.detritus.len(), 2);
        Ok(())
    }

    #[test]
    fn copy_pairs_skip_touch_commands() -> CopyResult<()> {
        let mut plan = DestinationPlan::default();
        plan.commands.insert(IoCommand::copy(
            StoragePath::parse("/a/x")?,
            StoragePath::parse("/b/x")?,
        ));
        plan.commands
            .insert(IoCommand::touch(StoragePath::parse("/b/marker")?));
        let pairs = plan.copy_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].destination.to_string(), "/b/x");
        Ok(())
    }

    #[test]
    fn output_values_serialise_with_tags() -> anyhow::Result<()> {
        let value = OutputValue::file("/src/run1/out.txt");
        let json = serde_json::to_value(&value)?;
        assert_eq!(json["type"], "file");
        assert_eq!(value.as_file(), Some("/src/run1/out.txt"));
        assert!(OutputValue::Scalar(Value::from(3)).as_file().is_none());
        Ok(())
    }
}
