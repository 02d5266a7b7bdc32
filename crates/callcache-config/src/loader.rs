//! Loads configuration from JSON documents and environment overrides.
//!
//! # Design
//! - Documents are parsed with serde defaults, then overridden from the
//!   environment, then validated; callers only ever see validated configs.
//! - Environment access goes through a lookup closure so tests stay hermetic.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::CallCacheConfig;
use crate::validate::validate;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "CALLCACHE_";

const ENV_COPY_TIMEOUT: &str = "CALLCACHE_COPY_TIMEOUT_SECS";
const ENV_LOG_LEVEL: &str = "CALLCACHE_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "CALLCACHE_LOG_FORMAT";
const ENV_GROUPING_OPTION: &str = "CALLCACHE_BLACKLIST_GROUPING_OPTION";

/// Load, override from the process environment, and validate a config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid JSON, carries an
/// unparsable override, or fails validation.
pub fn load_from_path(path: &Path) -> ConfigResult<CallCacheConfig> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        operation: "config.read",
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: CallCacheConfig =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    debug!(path = %path.display(), "loaded call-cache configuration");
    Ok(config)
}

/// Parse and validate a JSON document without environment overrides.
///
/// # Errors
///
/// Returns an error if the document is not valid JSON or fails validation.
pub fn load_from_str(raw: &str) -> ConfigResult<CallCacheConfig> {
    let config: CallCacheConfig =
        serde_json::from_str(raw).map_err(|source| ConfigError::Parse { path: None, source })?;
    validate(&config)?;
    Ok(config)
}

/// Apply `CALLCACHE_*` overrides resolved through `lookup`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] if a numeric override does not parse.
pub fn apply_env_overrides<F>(config: &mut CallCacheConfig, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_COPY_TIMEOUT) {
        config.copy.timeout_secs = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid("copy", "timeout_secs", &value, "not_an_integer"))?;
        debug!(key = ENV_COPY_TIMEOUT, "applied environment override");
    }
    if let Some(value) = lookup(ENV_LOG_LEVEL) {
        config.telemetry.level = value;
        debug!(key = ENV_LOG_LEVEL, "applied environment override");
    }
    if let Some(value) = lookup(ENV_LOG_FORMAT) {
        config.telemetry.log_format = Some(value.to_ascii_lowercase());
        debug!(key = ENV_LOG_FORMAT, "applied environment override");
    }
    if let Some(value) = lookup(ENV_GROUPING_OPTION) {
        config.blacklist.groupings.workflow_option = Some(value);
        debug!(key = ENV_GROUPING_OPTION, "applied environment override");
    }
    Ok(())
}
