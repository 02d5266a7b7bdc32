//! Link-based duplication of cached files.
//!
//! # Design
//! - Each pair is tried with the configured strategies in order; the first
//!   strategy that produces the destination wins.
//! - An existing destination is removed first, matching the overwrite
//!   semantics of executor copies.
//! - Runs synchronously on the calling thread and reports one outcome for the
//!   whole copy set.

use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use callcache_core::{CopyPair, Duplication, DuplicationStrategy, StoragePath};
use tracing::{debug, warn};

use crate::error::{FsOpsError, FsOpsResult};

/// One way of making a cached file appear at a new location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStrategy {
    /// `link(2)`; both paths must share a filesystem.
    HardLink,
    /// Symbolic link pointing at the cached file.
    SoftLink,
    /// Full byte copy.
    Copy,
}

impl LinkStrategy {
    /// Configuration name of the strategy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HardLink => "hard-link",
            Self::SoftLink => "soft-link",
            Self::Copy => "copy",
        }
    }

    fn apply(self, source: &Path, destination: &Path) -> FsOpsResult<()> {
        match self {
            Self::HardLink => fs::hard_link(source, destination)
                .map_err(|err| FsOpsError::io("link.hard", destination, err)),
            Self::SoftLink => soft_link(source, destination),
            Self::Copy => fs::copy(source, destination)
                .map(|_| ())
                .map_err(|err| FsOpsError::io("link.copy", destination, err)),
        }
    }
}

impl Display for LinkStrategy {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for LinkStrategy {
    type Err = FsOpsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hard-link" => Ok(Self::HardLink),
            "soft-link" => Ok(Self::SoftLink),
            "copy" | "cached-copy" => Ok(Self::Copy),
            _ => Err(FsOpsError::InvalidStrategy {
                value: value.to_string(),
            }),
        }
    }
}

#[cfg(unix)]
fn soft_link(source: &Path, destination: &Path) -> FsOpsResult<()> {
    std::os::unix::fs::symlink(source, destination)
        .map_err(|err| FsOpsError::io("link.soft", destination, err))
}

#[cfg(not(unix))]
fn soft_link(_source: &Path, _destination: &Path) -> FsOpsResult<()> {
    Err(FsOpsError::Unsupported {
        operation: "link.soft",
    })
}

/// Duplicates local cached files by linking, falling back through strategies.
#[derive(Debug, Clone)]
pub struct LinkDuplication {
    strategies: Vec<LinkStrategy>,
}

impl Default for LinkDuplication {
    fn default() -> Self {
        Self {
            strategies: vec![LinkStrategy::HardLink, LinkStrategy::SoftLink, LinkStrategy::Copy],
        }
    }
}

impl LinkDuplication {
    /// Use `strategies` in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`FsOpsError::NoStrategies`] when the list is empty.
    pub fn new(strategies: Vec<LinkStrategy>) -> FsOpsResult<Self> {
        if strategies.is_empty() {
            return Err(FsOpsError::NoStrategies);
        }
        Ok(Self { strategies })
    }

    /// Parse strategy names such as `["soft-link", "copy"]`.
    ///
    /// # Errors
    ///
    /// Returns [`FsOpsError::InvalidStrategy`] for unknown names and
    /// [`FsOpsError::NoStrategies`] for an empty list.
    pub fn from_names<I, S>(names: I) -> FsOpsResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let strategies = names
            .into_iter()
            .map(|name| name.as_ref().parse())
            .collect::<FsOpsResult<Vec<_>>>()?;
        Self::new(strategies)
    }

    /// Configured strategies in trial order.
    #[must_use]
    pub fn strategies(&self) -> &[LinkStrategy] {
        &self.strategies
    }

    /// Duplicate one pair, returning the strategy that succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`FsOpsError::NonLocal`] for non-local paths and
    /// [`FsOpsError::Exhausted`] when every strategy failed.
    pub fn duplicate_pair(&self, pair: &CopyPair) -> FsOpsResult<LinkStrategy> {
        let source = local(&pair.source)?;
        let destination = local(&pair.destination)?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| FsOpsError::io("link.create_parent", parent, err))?;
        }
        remove_existing(&destination)?;

        let mut last = FsOpsError::NoStrategies;
        for strategy in &self.strategies {
            match strategy.apply(&source, &destination) {
                Ok(()) => {
                    debug!(
                        strategy = %strategy,
                        source = %source.display(),
                        destination = %destination.display(),
                        "duplicated cached file"
                    );
                    return Ok(*strategy);
                }
                Err(err) => {
                    debug!(strategy = %strategy, error = %err, "duplication strategy failed");
                    last = err;
                }
            }
        }
        Err(FsOpsError::Exhausted {
            destination,
            last: Box::new(last),
        })
    }
}

impl DuplicationStrategy for LinkDuplication {
    fn duplicate(&self, pairs: &[CopyPair]) -> Duplication {
        for pair in pairs {
            if let Err(err) = self.duplicate_pair(pair) {
                warn!(
                    source = %pair.source,
                    destination = %pair.destination,
                    error = %err,
                    "link duplication failed"
                );
                return Duplication::Completed(Err(Box::new(err)));
            }
        }
        Duplication::Completed(Ok(()))
    }
}

fn local(path: &StoragePath) -> FsOpsResult<PathBuf> {
    path.to_local_path().ok_or_else(|| FsOpsError::NonLocal {
        path: path.to_string(),
    })
}

fn remove_existing(destination: &Path) -> FsOpsResult<()> {
    match fs::symlink_metadata(destination) {
        Ok(metadata) if metadata.is_dir() => Err(FsOpsError::io(
            "link.remove_existing",
            destination,
            io::Error::new(io::ErrorKind::IsADirectory, "destination is a directory"),
        )),
        Ok(_) => fs::remove_file(destination)
            .map_err(|err| FsOpsError::io("link.remove_existing", destination, err)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(FsOpsError::io("link.inspect_existing", destination, err)),
    }
}
