//! Configuration module for mdbridge.
//!
//! Typed configuration structs mapping to the YAML configuration file, with
//! loading, defaults, and validation. The daemon/API layer loads this once
//! and passes the relevant sections down; nothing reads configuration
//! globally.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Top-level configuration for mdbridge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub sync: SyncConfig,
    pub transfer: TransferConfig,
    pub jobs: JobsConfig,
    pub deletion: DeletionConfig,
    pub logging: LoggingConfig,
}

/// Synchronization timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between upload-timer ticks.
    pub upload_interval: u64,
    /// Daily download time of day, 24h "HH:MM".
    pub download_time: String,
    /// Milliseconds a path must stay quiet before its change is forwarded.
    pub debounce_ms: u64,
    /// Milliseconds a self-write ignore registration stays active.
    pub ignore_ttl_ms: u64,
}

/// Binary transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Files above this size (in MiB) use chunked multipart upload.
    pub multipart_threshold_mb: u64,
    /// Size of each multipart chunk (in MiB).
    pub chunk_size_mb: u64,
}

/// Export/import job polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Maximum poll attempts before a job is reported failed.
    pub poll_attempts: u32,
    /// Seconds between poll attempts.
    pub poll_interval: u64,
}

/// Tombstone / deletion propagation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionConfig {
    /// Default grace period (seconds) for tasks with the Safe delete policy.
    pub default_grace: u64,
    /// Backoff (seconds) applied to a failed tombstone before retry.
    pub retry_backoff: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Path to the log file.
    pub file: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            upload_interval: 300,
            download_time: "03:30".to_string(),
            debounce_ms: 2000,
            ignore_ttl_ms: 5000,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            multipart_threshold_mb: 20,
            chunk_size_mb: 4,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 30,
            poll_interval: 2,
        }
    }
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            default_grace: 86_400,
            retry_backoff: 600,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: PathBuf::from("mdbridge.log"),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Validates cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), DomainError> {
        parse_download_time(&self.sync.download_time)?;

        if self.transfer.chunk_size_mb == 0 {
            return Err(DomainError::InvalidConfig(
                "transfer.chunk_size_mb must be at least 1".to_string(),
            ));
        }
        if self.transfer.chunk_size_mb > self.transfer.multipart_threshold_mb {
            return Err(DomainError::InvalidConfig(format!(
                "transfer.chunk_size_mb ({}) exceeds multipart_threshold_mb ({})",
                self.transfer.chunk_size_mb, self.transfer.multipart_threshold_mb
            )));
        }
        if self.jobs.poll_attempts == 0 {
            return Err(DomainError::InvalidConfig(
                "jobs.poll_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Multipart threshold in bytes.
    pub fn multipart_threshold_bytes(&self) -> u64 {
        self.transfer.multipart_threshold_mb * 1024 * 1024
    }
}

/// Parses a 24h "HH:MM" time-of-day string into (hour, minute).
pub fn parse_download_time(s: &str) -> Result<(u32, u32), DomainError> {
    let (h, m) = s.split_once(':').ok_or_else(|| {
        DomainError::InvalidConfig(format!("download_time '{s}' is not in HH:MM form"))
    })?;
    let hour: u32 = h
        .parse()
        .map_err(|_| DomainError::InvalidConfig(format!("invalid hour in '{s}'")))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| DomainError::InvalidConfig(format!("invalid minute in '{s}'")))?;
    if hour > 23 || minute > 59 {
        return Err(DomainError::InvalidConfig(format!(
            "download_time '{s}' out of range"
        )));
    }
    Ok((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_parse_download_time() {
        assert_eq!(parse_download_time("03:30").unwrap(), (3, 30));
        assert_eq!(parse_download_time("23:59").unwrap(), (23, 59));
        assert!(parse_download_time("24:00").is_err());
        assert!(parse_download_time("3.30").is_err());
        assert!(parse_download_time("ab:cd").is_err());
    }

    #[test]
    fn test_chunk_size_must_not_exceed_threshold() {
        let mut config = Config::default();
        config.transfer.chunk_size_mb = 64;
        config.transfer.multipart_threshold_mb = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let yaml = serde_yaml::to_string(&Config::default()).unwrap();
        std::fs::write(&path, yaml).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.sync.download_time, "03:30");
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(config.sync.upload_interval, 300);
    }
}
