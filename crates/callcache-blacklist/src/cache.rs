//! Tri-state trust cache for buckets and cache hits.
//!
//! # Design
//! - Two independent stores, one keyed by bucket prefix and one by hit; either
//!   can be disabled, in which case it reads `Unknown` and ignores writes.
//! - Blacklisting always overwrites. Whitelisting only promotes `Unknown`, so a
//!   single success never clears an established bad reputation.

use std::fmt::{self, Display, Formatter};

use callcache_config::{BlacklistConfig, StoreConfig};
use callcache_core::CacheHitId;
use tracing::{debug, warn};

use crate::error::BlacklistResult;
use crate::store::ExpiringStore;

/// Reputation of a bucket or hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BlacklistStatus {
    /// Nothing recorded, or the entry expired.
    #[default]
    Unknown,
    /// A copy recently succeeded.
    KnownGood,
    /// A copy recently failed.
    KnownBad,
}

impl BlacklistStatus {
    /// Name used in metric paths.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::KnownGood => "KnownGood",
            Self::KnownBad => "KnownBad",
        }
    }
}

impl Display for BlacklistStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Entry addressed in one of the two stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistKey<'a> {
    /// Storage-location prefix such as `gs://bucket-a`.
    Bucket(&'a str),
    /// Cache hit identifier.
    Hit(CacheHitId),
}

impl BlacklistKey<'_> {
    /// Store label used in logs and metric paths.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bucket(_) => "bucket",
            Self::Hit(_) => "hit",
        }
    }
}

impl Display for BlacklistKey<'_> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bucket(bucket) => formatter.write_str(bucket),
            Self::Hit(hit) => Display::fmt(hit, formatter),
        }
    }
}

/// Result of a whitelist request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitelistOutcome {
    /// `Unknown` became `KnownGood`.
    Promoted,
    /// The entry was already `KnownGood`.
    AlreadyGood,
    /// The entry is `KnownBad` and was left alone.
    Refused,
    /// The store is disabled.
    Disabled,
}

/// Bucket and hit reputations shared by every copy attempt in one group.
pub struct BlacklistCache {
    group: Option<String>,
    buckets: Option<ExpiringStore<String, BlacklistStatus>>,
    hits: Option<ExpiringStore<CacheHitId, BlacklistStatus>>,
}

impl BlacklistCache {
    /// Build the stores enabled in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BlacklistError::InvalidBound`] if an enabled store has a
    /// zero size or concurrency.
    pub fn new(config: &BlacklistConfig, group: Option<String>) -> BlacklistResult<Self> {
        Ok(Self {
            group,
            buckets: build_store("buckets", &config.buckets)?,
            hits: build_store("hits", &config.hits)?,
        })
    }

    /// Group label carried into metric paths, if the cache is shared by a group.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Whether bucket-level blacklisting is active.
    #[must_use]
    pub const fn buckets_enabled(&self) -> bool {
        self.buckets.is_some()
    }

    /// Whether hit-level blacklisting is active.
    #[must_use]
    pub const fn hits_enabled(&self) -> bool {
        self.hits.is_some()
    }

    /// Current status of `key`; absent, expired, and disabled entries are `Unknown`.
    #[must_use]
    pub fn status(&self, key: BlacklistKey<'_>) -> BlacklistStatus {
        let status = match key {
            BlacklistKey::Bucket(bucket) => self
                .buckets
                .as_ref()
                .and_then(|store| store.get(&bucket.to_string())),
            BlacklistKey::Hit(hit) => self.hits.as_ref().and_then(|store| store.get(&hit)),
        };
        status.unwrap_or_default()
    }

    /// Mark `key` as `KnownBad`. Returns `false` when the store is disabled.
    pub fn blacklist(&self, key: BlacklistKey<'_>) -> bool {
        let written = match key {
            BlacklistKey::Bucket(bucket) => self.buckets.as_ref().map(|store| {
                store.insert(bucket.to_string(), BlacklistStatus::KnownBad);
            }),
            BlacklistKey::Hit(hit) => self.hits.as_ref().map(|store| {
                store.insert(hit, BlacklistStatus::KnownBad);
            }),
        }
        .is_some();
        if written {
            debug!(kind = key.kind(), key = %key, "blacklisted");
        }
        written
    }

    /// Mark `key` as `KnownGood` unless it is already known to be bad.
    pub fn whitelist(&self, key: BlacklistKey<'_>) -> WhitelistOutcome {
        let previous = match key {
            BlacklistKey::Bucket(bucket) => self
                .buckets
                .as_ref()
                .map(|store| store.compute(bucket.to_string(), promote)),
            BlacklistKey::Hit(hit) => self.hits.as_ref().map(|store| store.compute(hit, promote)),
        };

        let outcome = match previous {
            None => WhitelistOutcome::Disabled,
            Some(None | Some(BlacklistStatus::Unknown)) => WhitelistOutcome::Promoted,
            Some(Some(BlacklistStatus::KnownGood)) => WhitelistOutcome::AlreadyGood,
            Some(Some(BlacklistStatus::KnownBad)) => WhitelistOutcome::Refused,
        };
        if outcome == WhitelistOutcome::Refused {
            warn!(
                kind = key.kind(),
                key = %key,
                "refusing to whitelist an entry that is already blacklisted"
            );
        }
        outcome
    }
}

fn promote(current: Option<&BlacklistStatus>) -> Option<BlacklistStatus> {
    match current {
        None | Some(BlacklistStatus::Unknown) => Some(BlacklistStatus::KnownGood),
        Some(BlacklistStatus::KnownGood | BlacklistStatus::KnownBad) => None,
    }
}

fn build_store<K>(
    name: &'static str,
    config: &StoreConfig,
) -> BlacklistResult<Option<ExpiringStore<K, BlacklistStatus>>>
where
    K: std::hash::Hash + Eq,
{
    if !config.enabled {
        return Ok(None);
    }
    ExpiringStore::new(name, config.size, config.concurrency, config.ttl()).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn cache(config: &BlacklistConfig) -> BlacklistCache {
        match BlacklistCache::new(config, None) {
            Ok(cache) => cache,
            Err(err) => panic!("cache should build: {err}"),
        }
    }

    #[test]
    fn blacklisting_is_idempotent_and_sticky() {
        let cache = cache(&BlacklistConfig::default());
        let hit = BlacklistKey::Hit(CacheHitId(7));

        assert_eq!(cache.status(hit), BlacklistStatus::Unknown);
        assert!(cache.blacklist(hit));
        assert!(cache.blacklist(hit));
        assert_eq!(cache.status(hit), BlacklistStatus::KnownBad);

        assert_eq!(cache.whitelist(hit), WhitelistOutcome::Refused);
        assert_eq!(cache.status(hit), BlacklistStatus::KnownBad);
    }

    #[test]
    fn whitelist_promotes_unknown_only() {
        let cache = cache(&BlacklistConfig::default());
        let bucket = BlacklistKey::Bucket("gs://bucket-a");

        assert_eq!(cache.whitelist(bucket), WhitelistOutcome::Promoted);
        assert_eq!(cache.status(bucket), BlacklistStatus::KnownGood);
        assert_eq!(cache.whitelist(bucket), WhitelistOutcome::AlreadyGood);

        assert!(cache.blacklist(bucket));
        assert_eq!(cache.status(bucket), BlacklistStatus::KnownBad);
        assert_eq!(
            cache.status(BlacklistKey::Bucket("gs://bucket-b")),
            BlacklistStatus::Unknown
        );
    }

    #[test]
    fn disabled_store_reads_unknown_and_ignores_writes() {
        let mut config = BlacklistConfig::default();
        config.buckets.enabled = false;
        let cache = cache(&config);
        let bucket = BlacklistKey::Bucket("gs://bucket-a");

        assert!(!cache.buckets_enabled());
        assert!(cache.hits_enabled());
        assert!(!cache.blacklist(bucket));
        assert_eq!(cache.status(bucket), BlacklistStatus::Unknown);
        assert_eq!(cache.whitelist(bucket), WhitelistOutcome::Disabled);
    }

    #[test]
    fn known_bad_expires_back_to_unknown() {
        let mut config = BlacklistConfig::default();
        config.hits.ttl_secs = 1;
        let cache = cache(&config);
        let hit = BlacklistKey::Hit(CacheHitId(1));

        cache.blacklist(hit);
        thread::sleep(Duration::from_millis(1_100));
        assert_eq!(cache.status(hit), BlacklistStatus::Unknown);
        assert_eq!(cache.whitelist(hit), WhitelistOutcome::Promoted);
    }

    #[test]
    fn key_display_and_kind() {
        assert_eq!(BlacklistKey::Hit(CacheHitId(3)).to_string(), "3");
        assert_eq!(BlacklistKey::Bucket("s3://b").kind(), "bucket");
        assert_eq!(BlacklistStatus::KnownGood.to_string(), "KnownGood");
    }
}
