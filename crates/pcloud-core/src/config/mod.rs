//! Runtime configuration of the sync core.
//!
//! Defaults suit a desktop install; every value can be overridden through
//! `PCLOUD_*` environment variables.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::translation::DOWNLOAD_CHANGE_BATCH_SIZE;
use crate::util::normalize_text_option;

/// Delay before a failed action is retried
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Visits kept per page by the passive data clean
pub const DEFAULT_PASSIVE_DATA_VISIT_LIMIT: usize = 20;

/// Sync core configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub retry_interval: Duration,
    /// Attempts before a queued action is marked failed, `None` retries forever
    pub max_action_attempts: Option<u32>,
    pub download_batch_size: usize,
    pub passive_data_visit_limit: usize,
    /// Keep integration errors and raise them from `wait_for_sync`
    pub strict_error_reporting: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_action_attempts: None,
            download_batch_size: DOWNLOAD_CHANGE_BATCH_SIZE,
            passive_data_visit_limit: DEFAULT_PASSIVE_DATA_VISIT_LIMIT,
            strict_error_reporting: false,
        }
    }
}

impl SyncConfig {
    /// Read overrides from the process environment
    pub fn from_env() -> Result<Self> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    /// Build the configuration from a variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let retry_interval = match optional_trimmed(&lookup, "PCLOUD_RETRY_INTERVAL_MS") {
            Some(value) => Duration::from_millis(parse_number(&value, "PCLOUD_RETRY_INTERVAL_MS")?),
            None => defaults.retry_interval,
        };

        let max_action_attempts = optional_trimmed(&lookup, "PCLOUD_MAX_ACTION_ATTEMPTS")
            .map(|value| parse_number::<u32>(&value, "PCLOUD_MAX_ACTION_ATTEMPTS"))
            .transpose()?
            .filter(|attempts| *attempts > 0);

        let download_batch_size = match optional_trimmed(&lookup, "PCLOUD_DOWNLOAD_BATCH_SIZE") {
            Some(value) => parse_number(&value, "PCLOUD_DOWNLOAD_BATCH_SIZE")?,
            None => defaults.download_batch_size,
        };
        if download_batch_size == 0 {
            return Err(Error::InvalidInput(
                "PCLOUD_DOWNLOAD_BATCH_SIZE must be >= 1".to_string(),
            ));
        }

        let passive_data_visit_limit =
            match optional_trimmed(&lookup, "PCLOUD_PASSIVE_DATA_VISIT_LIMIT") {
                Some(value) => parse_number(&value, "PCLOUD_PASSIVE_DATA_VISIT_LIMIT")?,
                None => defaults.passive_data_visit_limit,
            };

        let strict_error_reporting = optional_trimmed(&lookup, "PCLOUD_STRICT_ERRORS")
            .is_some_and(|value| {
                matches!(
                    value.to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            });

        Ok(Self {
            retry_interval,
            max_action_attempts,
            download_batch_size,
            passive_data_visit_limit,
            strict_error_reporting,
        })
    }
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidInput(format!("{name} must be a non-negative integer")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config_from(vars: &[(&str, &str)]) -> Result<SyncConfig> {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        SyncConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_defaults_without_overrides() {
        assert_eq!(config_from(&[]).unwrap(), SyncConfig::default());
    }

    #[test]
    fn config_reads_overrides() {
        let config = config_from(&[
            ("PCLOUD_RETRY_INTERVAL_MS", "250"),
            ("PCLOUD_MAX_ACTION_ATTEMPTS", " 5 "),
            ("PCLOUD_DOWNLOAD_BATCH_SIZE", "50"),
            ("PCLOUD_PASSIVE_DATA_VISIT_LIMIT", "3"),
            ("PCLOUD_STRICT_ERRORS", "TRUE"),
        ])
        .unwrap();

        assert_eq!(
            config,
            SyncConfig {
                retry_interval: Duration::from_millis(250),
                max_action_attempts: Some(5),
                download_batch_size: 50,
                passive_data_visit_limit: 3,
                strict_error_reporting: true,
            }
        );
    }

    #[test]
    fn config_zero_attempts_means_unlimited() {
        let config = config_from(&[("PCLOUD_MAX_ACTION_ATTEMPTS", "0")]).unwrap();
        assert_eq!(config.max_action_attempts, None);
    }

    #[test]
    fn config_rejects_invalid_numbers() {
        let err = config_from(&[("PCLOUD_RETRY_INTERVAL_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("PCLOUD_RETRY_INTERVAL_MS"));

        let err = config_from(&[("PCLOUD_DOWNLOAD_BATCH_SIZE", "0")]).unwrap_err();
        assert!(err.to_string().contains("PCLOUD_DOWNLOAD_BATCH_SIZE"));
    }
}
