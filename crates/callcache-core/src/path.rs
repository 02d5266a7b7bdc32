//! Storage paths understood by the copy protocol.
//!
//! # Design
//! - Paths are either local (`/a/b`, `file:///a/b`) or live in a remote container
//!   (`gs://bucket/a/b`); the container prefix is the blacklisting "bucket".
//! - Paths are normalised on parse so equality doubles as command identity.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CopyError, CopyResult};

const SCHEME_SEPARATOR: &str = "://";
const LOCAL_SCHEME: &str = "file";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Root {
    Local,
    Remote { scheme: String, container: String },
}

/// Normalised, absolute location of a file or directory on some storage backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoragePath {
    root: Root,
    segments: Vec<String>,
}

impl StoragePath {
    /// Parse and normalise a path string.
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::InvalidPath`] when the value is empty, relative,
    /// names a remote scheme without a container, or climbs above its root.
    pub fn parse(value: &str) -> CopyResult<Self> {
        if value.is_empty() {
            return Err(CopyError::invalid_path(value, "empty"));
        }

        let (root, rest) = match value.split_once(SCHEME_SEPARATOR) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case(LOCAL_SCHEME) => {
                if !rest.starts_with('/') {
                    return Err(CopyError::invalid_path(value, "relative"));
                }
                (Root::Local, rest)
            }
            Some((scheme, rest)) => {
                if scheme.is_empty() || !scheme.chars().all(is_scheme_char) {
                    return Err(CopyError::invalid_path(value, "invalid_scheme"));
                }
                let (container, rest) = rest.split_once('/').unwrap_or((rest, ""));
                if container.is_empty() {
                    return Err(CopyError::invalid_path(value, "missing_container"));
                }
                (
                    Root::Remote {
                        scheme: scheme.to_ascii_lowercase(),
                        container: container.to_string(),
                    },
                    rest,
                )
            }
            None if value.starts_with('/') => (Root::Local, value),
            None => return Err(CopyError::invalid_path(value, "relative")),
        };

        let mut segments: Vec<String> = Vec::new();
        for segment in rest.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(CopyError::invalid_path(value, "escapes_root"));
                    }
                }
                other => segments.push(other.to_string()),
            }
        }

        Ok(Self { root, segments })
    }

    /// Container prefix (`scheme://container`) used as the bucket blacklist key.
    ///
    /// Local paths have no bucket.
    #[must_use]
    pub fn bucket(&self) -> Option<String> {
        match &self.root {
            Root::Local => None,
            Root::Remote { scheme, container } => {
                Some(format!("{scheme}{SCHEME_SEPARATOR}{container}"))
            }
        }
    }

    /// Whether the path lives on the local filesystem.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self.root, Root::Local)
    }

    /// Local filesystem view of the path, if it is local.
    #[must_use]
    pub fn to_local_path(&self) -> Option<PathBuf> {
        self.is_local().then(|| PathBuf::from(self.to_string()))
    }

    /// Normalised path segments below the root.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Final segment, if any.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Append relative segments to this path.
    #[must_use]
    pub fn join<I, S>(&self, relative: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut joined = self.clone();
        for part in relative {
            for segment in part.as_ref().split('/') {
                match segment {
                    "" | "." => {}
                    ".." => {
                        joined.segments.pop();
                    }
                    other => joined.segments.push(other.to_string()),
                }
            }
        }
        joined
    }

    /// Relocate this path from `source_root` to `destination_root`.
    ///
    /// The longest common directory prefix shared with `source_root` is
    /// stripped and the remainder is appended to `destination_root`, so files
    /// below the source root keep their relative layout.
    #[must_use]
    pub fn relocate(&self, source_root: &Self, destination_root: &Self) -> Self {
        let common = if self.root == source_root.root {
            self.segments
                .iter()
                .zip(&source_root.segments)
                .take_while(|(left, right)| left == right)
                .count()
        } else {
            0
        };
        destination_root.join(&self.segments[common..])
    }
}

const fn is_scheme_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.')
}

impl Display for StoragePath {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match &self.root {
            Root::Local => {
                if self.segments.is_empty() {
                    return formatter.write_str("/");
                }
            }
            Root::Remote { scheme, container } => {
                write!(formatter, "{scheme}{SCHEME_SEPARATOR}{container}")?;
            }
        }
        for segment in &self.segments {
            write!(formatter, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for StoragePath {
    type Err = CopyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for StoragePath {
    type Error = CopyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StoragePath> for String {
    fn from(path: StoragePath) -> Self {
        path.to_string()
    }
}
