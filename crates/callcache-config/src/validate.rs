//! Validation helpers for configuration documents.

use crate::error::{ConfigError, ConfigResult};
use crate::model::{CallCacheConfig, StoreConfig};

const LOG_FORMATS: &[&str] = &["json", "pretty"];

/// Reject configurations the copy and blacklist subsystems cannot honour.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] naming the first offending field.
pub fn validate(config: &CallCacheConfig) -> ConfigResult<()> {
    ensure_positive("copy", "timeout_secs", config.copy.timeout_secs)?;

    validate_store("blacklist.buckets", &config.blacklist.buckets)?;
    validate_store("blacklist.hits", &config.blacklist.hits)?;

    let groupings = &config.blacklist.groupings;
    ensure_positive("blacklist.groupings", "size", groupings.size as u64)?;
    ensure_positive("blacklist.groupings", "ttl_secs", groupings.ttl_secs)?;
    if let Some(option) = &groupings.workflow_option
        && option.trim().is_empty()
    {
        return Err(ConfigError::invalid(
            "blacklist.groupings",
            "workflow_option",
            option,
            "must not be blank",
        ));
    }

    if config.telemetry.level.trim().is_empty() {
        return Err(ConfigError::invalid(
            "telemetry",
            "level",
            &config.telemetry.level,
            "must not be blank",
        ));
    }
    if let Some(format) = &config.telemetry.log_format
        && !LOG_FORMATS.contains(&format.as_str())
    {
        return Err(ConfigError::invalid(
            "telemetry",
            "log_format",
            format,
            "must be json or pretty",
        ));
    }

    Ok(())
}

fn validate_store(section: &'static str, store: &StoreConfig) -> ConfigResult<()> {
    if !store.enabled {
        return Ok(());
    }
    ensure_positive(section, "size", store.size as u64)?;
    ensure_positive(section, "concurrency", store.concurrency as u64)?;
    ensure_positive(section, "ttl_secs", store.ttl_secs)
}

fn ensure_positive(section: &'static str, field: &'static str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::invalid(section, field, value, "must be positive"));
    }
    Ok(())
}
