//! Hands out blacklist caches per group or per root workflow.
//!
//! # Design
//! - When a grouping workflow option is configured and a workflow sets it, all
//!   workflows with the same value share one cache; otherwise each root
//!   workflow gets its own.
//! - Caches are held in an expiring store sized by the grouping settings, so
//!   idle groups are forgotten.

use std::collections::BTreeMap;
use std::sync::Arc;

use callcache_config::BlacklistConfig;
use tracing::debug;
use uuid::Uuid;

use crate::cache::BlacklistCache;
use crate::error::BlacklistResult;
use crate::store::ExpiringStore;

const GROUPINGS_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Scope {
    Group(String),
    Workflow(Uuid),
}

/// Registry of shared blacklist caches.
pub struct BlacklistRegistry {
    config: BlacklistConfig,
    caches: ExpiringStore<Scope, Arc<BlacklistCache>>,
}

impl BlacklistRegistry {
    /// Build a registry from the blacklist configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BlacklistError::InvalidBound`] if the grouping size is zero.
    pub fn new(config: BlacklistConfig) -> BlacklistResult<Self> {
        let caches = ExpiringStore::new(
            "groupings",
            config.groupings.size,
            GROUPINGS_CONCURRENCY,
            config.groupings.ttl(),
        )?;
        Ok(Self { config, caches })
    }

    /// Cache for a root workflow carrying `workflow_options`.
    ///
    /// Returns `None` when neither store is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BlacklistError::InvalidBound`] if a newly built cache has
    /// an enabled store with a zero bound.
    pub fn cache_for(
        &self,
        root_workflow: Uuid,
        workflow_options: &BTreeMap<String, String>,
    ) -> BlacklistResult<Option<Arc<BlacklistCache>>> {
        if !self.config.any_enabled() {
            return Ok(None);
        }

        let group = self
            .config
            .groupings
            .workflow_option
            .as_ref()
            .and_then(|option| workflow_options.get(option))
            .filter(|value| !value.trim().is_empty())
            .cloned();
        let scope = group
            .clone()
            .map_or(Scope::Workflow(root_workflow), Scope::Group);

        self.caches
            .get_or_try_insert_with(scope, || {
                debug!(
                    group = group.as_deref().unwrap_or("none"),
                    workflow = %root_workflow,
                    "creating blacklist cache"
                );
                BlacklistCache::new(&self.config, group).map(Arc::new)
            })
            .map(Some)
    }
}
