//! Tracing subscriber setup
//!
//! Called once by the embedding process. `RUST_LOG` overrides the
//! configured level; with a log file configured, output switches to JSON
//! lines appended to that file, otherwise human-readable output goes to
//! stderr.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs the global tracing subscriber from the logging settings
///
/// Errors if the log file cannot be opened or a subscriber is already
/// installed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.file.as_os_str().is_empty() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))?;
        return Ok(());
    }

    if let Some(parent) = config.file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::options()
        .create(true)
        .append(true)
        .open(&config.file)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .with_writer(Arc::new(file))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test because the global subscriber installs once per process
    #[test]
    fn test_init_creates_log_file_and_rejects_reinstall() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            file: dir.path().join("logs").join("test.log"),
        };

        init(&config).unwrap();
        tracing::info!("hello from the logging test");
        assert!(config.file.exists());

        assert!(init(&config).is_err());
    }
}
