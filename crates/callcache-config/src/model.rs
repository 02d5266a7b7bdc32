//! Typed configuration sections.
//!
//! # Design
//! - Pure data carriers with serde defaults so partial documents load.
//! - Durations are stored as whole seconds and exposed as [`Duration`].

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::defaults::{
    BUCKET_CACHE_SIZE, COPY_TIMEOUT_SECS, GROUPINGS_SIZE, GROUPINGS_TTL_SECS, HIT_CACHE_SIZE,
    LOG_LEVEL, STORE_CONCURRENCY, STORE_TTL_SECS,
};

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallCacheConfig {
    /// Copy attempt settings.
    pub copy: CopyConfig,
    /// Blacklist cache settings.
    pub blacklist: BlacklistConfig,
    /// Logging settings.
    pub telemetry: TelemetryConfig,
}

/// Settings for a single cache-hit copy attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyConfig {
    /// Time allowed for each I/O command before it is treated as failed.
    pub timeout_secs: u64,
}

impl CopyConfig {
    /// Per-command timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: COPY_TIMEOUT_SECS,
        }
    }
}

/// Blacklist cache settings: one store per key kind plus grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    /// How caches are shared between workflows.
    pub groupings: GroupingsConfig,
    /// Store keyed by bucket prefix.
    #[serde(deserialize_with = "bucket_store")]
    pub buckets: StoreConfig,
    /// Store keyed by cache hit.
    pub hits: StoreConfig,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            groupings: GroupingsConfig::default(),
            buckets: StoreConfig::with_size(BUCKET_CACHE_SIZE),
            hits: StoreConfig::with_size(HIT_CACHE_SIZE),
        }
    }
}

/// Bucket store sections fall back to the smaller bucket capacity.
fn bucket_store<'de, D>(deserializer: D) -> Result<StoreConfig, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Partial {
        enabled: Option<bool>,
        size: Option<usize>,
        concurrency: Option<usize>,
        ttl_secs: Option<u64>,
    }

    let partial = Partial::deserialize(deserializer)?;
    let fallback = StoreConfig::with_size(BUCKET_CACHE_SIZE);
    Ok(StoreConfig {
        enabled: partial.enabled.unwrap_or(fallback.enabled),
        size: partial.size.unwrap_or(fallback.size),
        concurrency: partial.concurrency.unwrap_or(fallback.concurrency),
        ttl_secs: partial.ttl_secs.unwrap_or(fallback.ttl_secs),
    })
}

impl BlacklistConfig {
    /// Whether any store is enabled.
    #[must_use]
    pub const fn any_enabled(&self) -> bool {
        self.buckets.enabled || self.hits.enabled
    }
}

/// Bounds for one expiring store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Whether the store is consulted and written at all.
    pub enabled: bool,
    /// Maximum number of entries.
    pub size: usize,
    /// Expected number of concurrent writers; sizes the lock striping.
    pub concurrency: usize,
    /// Entry lifetime measured from the last write.
    pub ttl_secs: u64,
}

impl StoreConfig {
    const fn with_size(size: usize) -> Self {
        Self {
            enabled: true,
            size,
            concurrency: STORE_CONCURRENCY,
            ttl_secs: STORE_TTL_SECS,
        }
    }

    /// Entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::with_size(HIT_CACHE_SIZE)
    }
}

/// Sharing of blacklist caches across workflows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingsConfig {
    /// Workflow option whose value names a shared blacklist group.
    pub workflow_option: Option<String>,
    /// Maximum number of live groups.
    pub size: usize,
    /// Lifetime of a group cache.
    pub ttl_secs: u64,
}

impl GroupingsConfig {
    /// Group lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for GroupingsConfig {
    fn default() -> Self {
        Self {
            workflow_option: None,
            size: GROUPINGS_SIZE,
            ttl_secs: GROUPINGS_TTL_SECS,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Log level filter when `RUST_LOG` is not set.
    pub level: String,
    /// `json` or `pretty`; inferred from the build profile when absent.
    pub log_format: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: LOG_LEVEL.to_string(),
            log_format: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_both_stores() {
        let config = CallCacheConfig::default();
        assert!(config.blacklist.any_enabled());
        assert_eq!(config.blacklist.hits.size, HIT_CACHE_SIZE);
        assert_eq!(config.blacklist.buckets.size, BUCKET_CACHE_SIZE);
        assert_eq!(config.copy.timeout(), Duration::from_secs(COPY_TIMEOUT_SECS));
        assert!(config.blacklist.groupings.workflow_option.is_none());
    }

    #[test]
    fn partial_documents_fill_in_defaults() -> anyhow::Result<()> {
        let config: CallCacheConfig = serde_json::from_str(
            r#"{"blacklist": {"buckets": {"enabled": false}}, "copy": {"timeout_secs": 5}}"#,
        )?;
        assert!(!config.blacklist.buckets.enabled);
        assert_eq!(config.blacklist.buckets.ttl_secs, STORE_TTL_SECS);
        assert_eq!(config.blacklist.buckets.size, BUCKET_CACHE_SIZE);
        assert!(config.blacklist.hits.enabled);
        assert_eq!(config.copy.timeout(), Duration::from_secs(5));
        Ok(())
    }
}
