//! Ambient configuration for a `TriggerManager` instance: sweep intervals,
//! channel capacity, and poll resolution -- not part of any individual
//! trigger's config.

use serde::{Deserialize, Serialize};

/// Construction-time knobs for a `TriggerManager`. All fields have defaults,
/// so `ManagerConfig::default()` is always a valid configuration; a TOML
/// file only needs to override what it wants to change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// How often the dedup cache sweeps expired entries, in milliseconds.
    pub dedup_sweep_interval_ms: u64,
    /// How often the rate limiter sweeps full-capacity buckets/windows, in
    /// milliseconds.
    pub rate_limiter_sweep_interval_ms: u64,
    /// Broadcast channel capacity backing the event bus; exceeding it drops
    /// the oldest unread event for a lagging subscriber.
    pub event_bus_channel_capacity: usize,
    /// Floor on the cron scheduler's poll/verify resolution when no
    /// registered expression constrains seconds, in milliseconds.
    pub cron_poll_resolution_ms: u64,
}

fn default_dedup_sweep_interval_ms() -> u64 {
    60_000
}

fn default_rate_limiter_sweep_interval_ms() -> u64 {
    60_000
}

fn default_event_bus_channel_capacity() -> usize {
    1024
}

fn default_cron_poll_resolution_ms() -> u64 {
    60_000
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            dedup_sweep_interval_ms: default_dedup_sweep_interval_ms(),
            rate_limiter_sweep_interval_ms: default_rate_limiter_sweep_interval_ms(),
            event_bus_channel_capacity: default_event_bus_channel_capacity(),
            cron_poll_resolution_ms: default_cron_poll_resolution_ms(),
        }
    }
}

impl ManagerConfig {
    /// Parse a TOML document, falling back to defaults for any field left
    /// unset.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Load and parse a TOML file from disk.
    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigLoadError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|source| ConfigLoadError::Io { source })?;
        Self::from_toml_str(&contents).map_err(|source| ConfigLoadError::Parse { source })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read manager config file: {source}")]
    Io { source: std::io::Error },

    #[error("failed to parse manager config TOML: {source}")]
    Parse { source: toml::de::Error },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ManagerConfig::default();
        assert_eq!(config.dedup_sweep_interval_ms, 60_000);
        assert_eq!(config.rate_limiter_sweep_interval_ms, 60_000);
        assert_eq!(config.event_bus_channel_capacity, 1024);
        assert_eq!(config.cron_poll_resolution_ms, 60_000);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = ManagerConfig::from_toml_str("").unwrap();
        assert_eq!(config.event_bus_channel_capacity, 1024);
    }

    #[test]
    fn test_partial_toml_overrides_only_given_fields() {
        let config = ManagerConfig::from_toml_str("dedup_sweep_interval_ms = 5000\n").unwrap();
        assert_eq!(config.dedup_sweep_interval_ms, 5000);
        assert_eq!(config.rate_limiter_sweep_interval_ms, 60_000);
    }

    #[test]
    fn test_load_from_path_missing_file_is_io_error() {
        let result = ManagerConfig::load_from_path("/nonexistent/path/manager.toml");
        assert!(matches!(result, Err(ConfigLoadError::Io { .. })));
    }

    #[test]
    fn test_load_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.toml");
        std::fs::write(&path, "cron_poll_resolution_ms = 1000\n").unwrap();
        let config = ManagerConfig::load_from_path(&path).unwrap();
        assert_eq!(config.cron_poll_resolution_ms, 1000);
    }
}
