// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Controller configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`Controller`](crate::Controller) run.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Explicit checkpoint path. When unset the path is derived from the
    /// producer's component name inside `state_dir`.
    pub state_file: Option<PathBuf>,
    /// Directory for derived checkpoint paths (default: ".")
    pub state_dir: PathBuf,
    /// How long the checkpoint writer and the drain loop sleep between polls.
    /// Zero means a bare scheduler yield.
    pub poll_interval: Duration,
    /// How long shutdown waits for the checkpoint writer before giving up on it.
    pub writer_join_timeout: Duration,
    /// Overwrite the checkpoint with an empty record when a run dispatches
    /// nothing (default: false, the previous checkpoint is kept).
    pub clear_on_empty_run: bool,
    /// Log progress through `tracing` (default: true)
    pub progress: bool,
    /// Minimum time between two progress log lines.
    pub progress_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            state_file: None,
            state_dir: PathBuf::from("."),
            poll_interval: Duration::from_millis(5),
            writer_join_timeout: Duration::from_secs(1),
            clear_on_empty_run: false,
            progress: true,
            progress_interval: Duration::from_secs(1),
        }
    }
}

impl ControllerConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `BATCHKEEPER_STATE_FILE` - Explicit checkpoint path
    /// - `BATCHKEEPER_STATE_DIR` - Directory for derived checkpoint paths (default: ".")
    /// - `BATCHKEEPER_POLL_INTERVAL_MS` - Writer/drain poll interval (default: 5)
    /// - `BATCHKEEPER_WRITER_JOIN_TIMEOUT_MS` - Writer shutdown timeout (default: 1000)
    /// - `BATCHKEEPER_CLEAR_ON_EMPTY_RUN` - Erase checkpoint on empty runs (default: false)
    /// - `BATCHKEEPER_PROGRESS` - Log progress (default: true)
    /// - `BATCHKEEPER_PROGRESS_INTERVAL_MS` - Progress log throttle (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let state_file = lookup("BATCHKEEPER_STATE_FILE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let state_dir = lookup("BATCHKEEPER_STATE_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir);

        let poll_interval = parse_millis(&lookup, "BATCHKEEPER_POLL_INTERVAL_MS")?
            .unwrap_or(defaults.poll_interval);

        let writer_join_timeout = parse_millis(&lookup, "BATCHKEEPER_WRITER_JOIN_TIMEOUT_MS")?
            .unwrap_or(defaults.writer_join_timeout);

        let clear_on_empty_run = parse_bool(&lookup, "BATCHKEEPER_CLEAR_ON_EMPTY_RUN")?
            .unwrap_or(defaults.clear_on_empty_run);

        let progress = parse_bool(&lookup, "BATCHKEEPER_PROGRESS")?.unwrap_or(defaults.progress);

        let progress_interval = parse_millis(&lookup, "BATCHKEEPER_PROGRESS_INTERVAL_MS")?
            .unwrap_or(defaults.progress_interval);

        Ok(Self {
            state_file,
            state_dir,
            poll_interval,
            writer_join_timeout,
            clear_on_empty_run,
            progress,
            progress_interval,
        })
    }

    /// Set an explicit checkpoint path.
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    /// Set the directory used for derived checkpoint paths.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Set the writer/drain poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the checkpoint writer shutdown timeout.
    pub fn with_writer_join_timeout(mut self, timeout: Duration) -> Self {
        self.writer_join_timeout = timeout;
        self
    }

    /// Erase the checkpoint when a run dispatches no jobs.
    pub fn with_clear_on_empty_run(mut self, clear: bool) -> Self {
        self.clear_on_empty_run = clear;
        self
    }

    /// Enable or disable progress logging.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Set the progress log throttle.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

fn parse_millis(
    lookup: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn parse_bool(
    lookup: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue { key, value: raw }),
        },
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// The offending variable.
        key: &'static str,
        /// The raw value found.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: HashMap<&'static str, String> =
            pairs.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert!(config.state_file.is_none());
        assert_eq!(config.state_dir, PathBuf::from("."));
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.writer_join_timeout, Duration::from_secs(1));
        assert!(!config.clear_on_empty_run);
        assert!(config.progress);
    }

    #[test]
    fn test_from_empty_environment() {
        let config = ControllerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert!(config.state_file.is_none());
        assert_eq!(config.poll_interval, Duration::from_millis(5));
    }

    #[test]
    fn test_from_environment_overrides() {
        let config = ControllerConfig::from_lookup(lookup_from(&[
            ("BATCHKEEPER_STATE_FILE", "/var/lib/jobs/users.state"),
            ("BATCHKEEPER_POLL_INTERVAL_MS", "0"),
            ("BATCHKEEPER_WRITER_JOIN_TIMEOUT_MS", "250"),
            ("BATCHKEEPER_CLEAR_ON_EMPTY_RUN", "yes"),
            ("BATCHKEEPER_PROGRESS", "0"),
        ]))
        .unwrap();

        assert_eq!(
            config.state_file,
            Some(PathBuf::from("/var/lib/jobs/users.state"))
        );
        assert_eq!(config.poll_interval, Duration::ZERO);
        assert_eq!(config.writer_join_timeout, Duration::from_millis(250));
        assert!(config.clear_on_empty_run);
        assert!(!config.progress);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = ControllerConfig::from_lookup(lookup_from(&[(
            "BATCHKEEPER_POLL_INTERVAL_MS",
            "soon",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("BATCHKEEPER_POLL_INTERVAL_MS"));
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        let result =
            ControllerConfig::from_lookup(lookup_from(&[("BATCHKEEPER_PROGRESS", "maybe")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                key: "BATCHKEEPER_PROGRESS",
                ..
            })
        ));
    }

    #[test]
    fn test_builder_pattern() {
        let config = ControllerConfig::new()
            .with_state_dir("/tmp/state")
            .with_poll_interval(Duration::from_millis(1))
            .with_clear_on_empty_run(true)
            .with_progress(false);

        assert_eq!(config.state_dir, PathBuf::from("/tmp/state"));
        assert_eq!(config.poll_interval, Duration::from_millis(1));
        assert!(config.clear_on_empty_run);
        assert!(!config.progress);
    }
}
