//! Global configuration model for Dockhand.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{DockhandError, Result};

/// Root configuration for the image manager.
///
/// Durations are stored in whole seconds so the JSON file stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockhandConfig {
    /// Base directory for the image catalog.
    pub data_dir: PathBuf,
    /// Overall deadline for a retried pull, in seconds.
    pub pull_timeout_secs: u64,
    /// Pause between retried pull attempts, in seconds.
    pub pull_interval_secs: u64,
    /// Timeout of a single registry HTTP request, in seconds.
    pub request_timeout_secs: u64,
    /// Registry hosts contacted over plain HTTP.
    pub insecure_registries: Vec<String>,
    /// Whether offline mode is enabled (every pull fails as unreachable).
    pub offline: bool,
}

impl Default for DockhandConfig {
    fn default() -> Self {
        Self {
            data_dir: constants::data_dir().clone(),
            pull_timeout_secs: constants::DEFAULT_PULL_TIMEOUT.as_secs(),
            pull_interval_secs: constants::DEFAULT_PULL_INTERVAL.as_secs(),
            request_timeout_secs: constants::DEFAULT_REQUEST_TIMEOUT.as_secs(),
            insecure_registries: Vec::new(),
            offline: false,
        }
    }
}

impl DockhandConfig {
    /// Loads a configuration file. Missing keys fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON,
    /// or contains inconsistent values.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DockhandError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `DockhandError::Config` when a timeout is zero or the retry
    /// interval exceeds the retry deadline.
    pub fn validate(&self) -> Result<()> {
        if self.pull_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(DockhandError::Config {
                message: "timeouts must be greater than zero".into(),
            });
        }
        if self.pull_interval_secs > self.pull_timeout_secs {
            return Err(DockhandError::Config {
                message: format!(
                    "pull interval ({}s) exceeds pull timeout ({}s)",
                    self.pull_interval_secs, self.pull_timeout_secs
                ),
            });
        }
        Ok(())
    }

    /// Overall deadline for a retried pull.
    #[must_use]
    pub const fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    /// Pause between retried pull attempts.
    #[must_use]
    pub const fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.pull_interval_secs)
    }

    /// Timeout of a single registry request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether the given registry host should be contacted over HTTP.
    #[must_use]
    pub fn is_insecure(&self, host: &str) -> bool {
        self.insecure_registries.iter().any(|h| h == host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_constants() {
        let config = DockhandConfig::default();
        assert_eq!(config.pull_timeout(), constants::DEFAULT_PULL_TIMEOUT);
        assert_eq!(config.pull_interval(), constants::DEFAULT_PULL_INTERVAL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "data_dir": "/tmp/dh", "insecure_registries": ["localhost:5000"] }"#,
        )
        .expect("write");

        let config = DockhandConfig::load(&path).expect("load");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/dh"));
        assert!(config.is_insecure("localhost:5000"));
        assert!(!config.is_insecure("gcr.io"));
        assert_eq!(config.pull_interval_secs, 15);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = DockhandConfig::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, DockhandError::Io { .. }));
    }

    #[test]
    fn load_invalid_json_is_serialization_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").expect("write");
        let err = DockhandConfig::load(&path).unwrap_err();
        assert!(matches!(err, DockhandError::Serialization { .. }));
    }

    #[test]
    fn interval_longer_than_timeout_is_rejected() {
        let config = DockhandConfig {
            pull_timeout_secs: 10,
            pull_interval_secs: 20,
            ..DockhandConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DockhandError::Config { .. })
        ));
    }
}
