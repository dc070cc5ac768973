// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host configuration.
//!
//! Supports both programmatic and file-based configuration.
//!
//! ```toml
//! poll_timeout_ms = 60000
//! pending_reads_batch = 256
//! page_reads_batch = 1024
//! max_events = 64
//! cmd_thread_name = "dlhost-cmd"
//! log_thread_name = "dlhost-log"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime knobs for [`crate::DataLoaderHost`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Upper bound of a single event-loop poll (milliseconds).
    pub poll_timeout_ms: u64,

    /// Pending-read records drained per batch.
    pub pending_reads_batch: usize,

    /// Page-read records drained per batch.
    pub page_reads_batch: usize,

    /// Readiness events fetched per poll.
    pub max_events: usize,

    /// Name of the pending-reads loop thread.
    pub cmd_thread_name: String,

    /// Name of the page-log loop thread.
    pub log_thread_name: String,
}

/// 60s, matching the loop period of the platform service.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 60 * 1000;
pub const DEFAULT_PENDING_READS_BATCH: usize = 256;
pub const DEFAULT_PAGE_READS_BATCH: usize = 1024;
pub const DEFAULT_MAX_EVENTS: usize = 64;

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            pending_reads_batch: DEFAULT_PENDING_READS_BATCH,
            page_reads_batch: DEFAULT_PAGE_READS_BATCH,
            max_events: DEFAULT_MAX_EVENTS,
            cmd_thread_name: "dlhost-cmd".to_string(),
            log_thread_name: "dlhost-log".to_string(),
        }
    }
}

impl HostConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML (used by `gen-config`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid("poll_timeout_ms must be > 0".into()));
        }
        if self.pending_reads_batch == 0 {
            return Err(ConfigError::Invalid(
                "pending_reads_batch must be > 0".into(),
            ));
        }
        if self.page_reads_batch == 0 {
            return Err(ConfigError::Invalid("page_reads_batch must be > 0".into()));
        }
        if self.max_events == 0 {
            return Err(ConfigError::Invalid("max_events must be > 0".into()));
        }
        if self.cmd_thread_name.is_empty() || self.log_thread_name.is_empty() {
            return Err(ConfigError::Invalid("thread names must not be empty".into()));
        }
        Ok(())
    }

    /// Poll timeout as a [`Duration`].
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = HostConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_timeout(), Duration::from_secs(60));
        assert_eq!(config.pending_reads_batch, 256);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "poll_timeout_ms = 250").expect("write");
        writeln!(file, "cmd_thread_name = \"incfs-cmd\"").expect("write");

        let config = HostConfig::from_file(file.path()).expect("load");
        assert_eq!(config.poll_timeout_ms, 250);
        assert_eq!(config.cmd_thread_name, "incfs-cmd");
        assert_eq!(config.log_thread_name, "dlhost-log");
        assert_eq!(config.page_reads_batch, DEFAULT_PAGE_READS_BATCH);
    }

    #[test]
    fn zero_batch_is_rejected() {
        let err = HostConfig::from_toml("pending_reads_batch = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn empty_thread_name_is_rejected() {
        let config = HostConfig {
            log_thread_name: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = HostConfig::from_toml("poll_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn generated_config_loads_back() {
        let text = HostConfig::default().to_toml().expect("encode");
        let config = HostConfig::from_toml(&text).expect("decode");
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = HostConfig::from_file("/nonexistent/dlhost.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
