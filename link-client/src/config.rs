//! Configuration for objlink-client.
//!
//! A [`LinkConfig`] can be built in code with the `with_*` methods or
//! loaded from a TOML file. Every field has a default, so an empty file
//! is a valid configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use objlink_core::DEFAULT_LEGROOM;

/// Configuration for a [`Link`](crate::Link).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkConfig {
    /// IPC endpoint of the local service (default: ws://127.0.0.1:7772).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Verbose logging (default: false).
    #[serde(default)]
    pub debug: bool,
    /// Update queue depth and history length per dynamic object (default: 3).
    #[serde(default = "default_legroom")]
    pub legroom: usize,
    /// Timeout for blocking calls in milliseconds (default: none).
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
    /// Name of the link's context thread (default: "objlink").
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

// Default value functions
fn default_endpoint() -> String {
    "ws://127.0.0.1:7772".to_string()
}

fn default_legroom() -> usize {
    DEFAULT_LEGROOM
}

fn default_thread_name() -> String {
    "objlink".to_string()
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            debug: false,
            legroom: default_legroom(),
            call_timeout_ms: None,
            thread_name: default_thread_name(),
        }
    }
}

impl LinkConfig {
    /// Create a configuration for the given endpoint, other fields default.
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Self::default()
        }
    }

    /// Set the verbose logging flag.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the legroom.
    pub fn with_legroom(mut self, legroom: usize) -> Self {
        self.legroom = legroom;
        self
    }

    /// Set the blocking-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the context thread name.
    pub fn with_thread_name(mut self, name: &str) -> Self {
        self.thread_name = name.to_string();
        self
    }

    /// The blocking-call timeout, if one is configured.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check field values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint must not be empty".into()));
        }
        if self.legroom == 0 {
            return Err(ConfigError::Invalid("legroom must be at least 1".into()));
        }
        if self.legroom > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "legroom must be at most {}",
                u16::MAX
            )));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A field has an unusable value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = LinkConfig::default();
        assert_eq!(config.endpoint, "ws://127.0.0.1:7772");
        assert_eq!(config.legroom, 3);
        assert!(!config.debug);
        assert!(config.call_timeout().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
endpoint = "ws://localhost:9000"
debug = true
legroom = 8
call_timeout_ms = 1500
thread_name = "app-link"
"#;

        let config = LinkConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.endpoint, "ws://localhost:9000");
        assert!(config.debug);
        assert_eq!(config.legroom, 8);
        assert_eq!(config.call_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.thread_name, "app-link");
    }

    #[test]
    fn config_missing_fields_use_defaults() {
        let config = LinkConfig::from_toml_str("").unwrap();
        assert_eq!(config, LinkConfig::default());
    }

    #[test]
    fn zero_legroom_rejected() {
        let result = LinkConfig::from_toml_str("legroom = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_endpoint_rejected() {
        let result = LinkConfig::new("  ").validate();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let result = LinkConfig::from_toml_str("legroom = \"lots\"");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn builder_methods() {
        let config = LinkConfig::new("ws://127.0.0.1:1")
            .with_debug(true)
            .with_legroom(5)
            .with_call_timeout(Duration::from_secs(2))
            .with_thread_name("t");
        assert!(config.debug);
        assert_eq!(config.legroom, 5);
        assert_eq!(config.call_timeout_ms, Some(2000));
        assert_eq!(config.thread_name, "t");
    }

    #[test]
    fn config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "endpoint = \"ws://127.0.0.1:7000\"").unwrap();
        writeln!(file, "legroom = 2").unwrap();

        let config = LinkConfig::from_file(file.path()).unwrap();
        assert_eq!(config.endpoint, "ws://127.0.0.1:7000");
        assert_eq!(config.legroom, 2);
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = LinkConfig::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }
}
