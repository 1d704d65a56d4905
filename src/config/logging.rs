//! # Logging Configuration
//!
//! Read before anything else so the rest of the configuration can log.

use crate::config::env_var_or_default_str;

/// Tracing subscriber settings
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE), used when `RUST_LOG` is unset
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: "json".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Load from `LOG_LEVEL` and `LOG_FORMAT`
    ///
    /// Plain string reads only, nothing here can fail or log.
    pub fn from_env() -> Self {
        Self {
            level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            format: env_var_or_default_str("LOG_FORMAT", "json"),
        }
    }

    /// `EnvFilter` directive for the configured level
    #[must_use]
    pub fn filter_directive(&self) -> String {
        self.level.trim().to_lowercase()
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format.trim().eq_ignore_ascii_case("json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_and_format() {
        let config = LoggingConfig {
            level: " DEBUG ".to_string(),
            format: "Text".to_string(),
        };
        assert_eq!(config.filter_directive(), "debug");
        assert!(!config.is_json());
        assert!(LoggingConfig::default().is_json());
        assert_eq!(LoggingConfig::default().filter_directive(), "info");
    }
}
