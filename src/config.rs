//! Terminal configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default directory (or URL prefix) holding `<name>.bin` modules
pub const DEFAULT_BIN_PATH: &str = "bin";

/// Default remote registry endpoint
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.wapm.io/graphql";

/// Default number of history entries
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// Default command prompt
pub const DEFAULT_PROMPT: &str = "$ ";

/// Default script hosting the background worker
pub const DEFAULT_WORKER_URL: &str = "./worker.js";

/// Which execution context runs commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Background when the host supports it, prompts otherwise
    #[default]
    Auto,
    /// Always run on the UI context, asking for input with prompts
    Foreground,
    /// Always run on a background context (fails if unsupported)
    Background,
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// JSON could not be parsed
    Parse(String),
    /// A field has an unusable value
    Invalid { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "invalid config: {}", msg),
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid config field '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Terminal configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TermConfig {
    /// Where `<name>.bin`, `<name>.rt` and `<name>.lnk` are looked up
    pub bin_path: String,
    /// GraphQL endpoint of the package registry; `None` disables the fallback
    pub registry_url: Option<String>,
    /// Number of command lines kept in history
    pub history_size: usize,
    /// Prompt shown before each command line
    pub prompt: String,
    /// Execution context selection
    pub execution: ExecutionMode,
    /// Module script loaded by the background worker (browser only)
    pub worker_url: String,
    /// Print the welcome banner on activation
    pub welcome: bool,
}

impl Default for TermConfig {
    fn default() -> Self {
        Self {
            bin_path: DEFAULT_BIN_PATH.to_string(),
            registry_url: Some(DEFAULT_REGISTRY_URL.to_string()),
            history_size: DEFAULT_HISTORY_SIZE,
            prompt: DEFAULT_PROMPT.to_string(),
            execution: ExecutionMode::Auto,
            worker_url: DEFAULT_WORKER_URL.to_string(),
            welcome: true,
        }
    }
}

impl TermConfig {
    /// Config with a custom binary path, everything else default
    pub fn with_bin_path(bin_path: impl Into<String>) -> Self {
        Self {
            bin_path: bin_path.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: TermConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check field values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_size == 0 {
            return Err(ConfigError::Invalid {
                field: "history_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.worker_url.is_empty() {
            return Err(ConfigError::Invalid {
                field: "worker_url",
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(url) = &self.registry_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    field: "registry_url",
                    reason: format!("not an http(s) url: {}", url),
                });
            }
        }
        Ok(())
    }

    /// Binary path without trailing slashes
    pub fn bin_dir(&self) -> &str {
        let trimmed = self.bin_path.trim_end_matches('/');
        if trimmed.is_empty() && self.bin_path.starts_with('/') {
            "/"
        } else {
            trimmed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_default() {
        let config = TermConfig::from_json("{}").unwrap();
        assert_eq!(config, TermConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let config =
            TermConfig::from_json(r#"{"bin_path": "./binaries", "execution": "foreground"}"#)
                .unwrap();
        assert_eq!(config.bin_path, "./binaries");
        assert_eq!(config.execution, ExecutionMode::Foreground);
        assert_eq!(config.history_size, DEFAULT_HISTORY_SIZE);
    }

    #[test]
    fn test_registry_can_be_disabled() {
        let config = TermConfig::from_json(r#"{"registry_url": null}"#).unwrap();
        assert!(config.registry_url.is_none());
    }

    #[test]
    fn test_zero_history_rejected() {
        let result = TermConfig::from_json(r#"{"history_size": 0}"#);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "history_size",
                ..
            })
        ));
    }

    #[test]
    fn test_bad_registry_url_rejected() {
        let result = TermConfig::from_json(r#"{"registry_url": "ftp://x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            TermConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_bin_dir_trims_slashes() {
        assert_eq!(TermConfig::with_bin_path("bin/").bin_dir(), "bin");
        assert_eq!(TermConfig::with_bin_path("/").bin_dir(), "/");
        assert_eq!(TermConfig::with_bin_path("http://x/bin").bin_dir(), "http://x/bin");
    }
}
