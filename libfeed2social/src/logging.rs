//! Logging setup shared by the feed2social binary and its tests
//!
//! Run reports go to stdout; everything logged here goes to stderr so the
//! two can be piped separately. JSON output is meant for log shippers and
//! error reporting.
//!
//! ```no_run
//! use libfeed2social::logging::{LoggingConfig, LogFormat};
//!
//! LoggingConfig::new(LogFormat::Json, "info".to_string(), false).init();
//! ```

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text output (no colors, for piping)
    Text,
    /// Machine-parseable JSON (one JSON object per line)
    Json,
    /// Pretty-printed with colors (for development)
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// Configuration for logging initialization
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    /// Create a new logging configuration
    ///
    /// # Arguments
    ///
    /// * `format` - Log output format (text, json, or pretty)
    /// * `level` - Minimum log level (error, warn, info, debug, trace)
    /// * `verbose` - If true, defaults to debug level
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Filter directive used when `RUST_LOG` is not set
    pub fn default_directive(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.level
        }
    }

    /// Install the global subscriber
    ///
    /// Returns `false` when a subscriber is already installed, which happens
    /// when tests initialise logging more than once.
    pub fn init(&self) -> bool {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_directive()));

        let installed = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_line_number(true)
                .with_file(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .try_init(),
        };

        installed.is_ok()
    }
}

pub const LOG_FORMAT_ENV_VAR: &str = "FEED2SOCIAL_LOG_FORMAT";
pub const LOG_LEVEL_ENV_VAR: &str = "FEED2SOCIAL_LOG_LEVEL";

impl LoggingConfig {
    /// Settings from `FEED2SOCIAL_LOG_FORMAT` and `FEED2SOCIAL_LOG_LEVEL`,
    /// falling back to text at info level
    pub fn from_env(verbose: bool) -> Self {
        let format = std::env::var(LOG_FORMAT_ENV_VAR)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(LogFormat::Text);

        let level = std::env::var(LOG_LEVEL_ENV_VAR).unwrap_or_else(|_| "info".to_string());

        Self::new(format, level, verbose)
    }
}

/// Initialize logging with settings taken from the environment
///
/// ```bash
/// FEED2SOCIAL_LOG_FORMAT=json FEED2SOCIAL_LOG_LEVEL=debug feed2social --once
/// ```
pub fn init_default() -> bool {
    LoggingConfig::from_env(false).init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);

        // Case insensitive
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("Json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    }

    #[test]
    fn test_log_format_from_str_invalid() {
        let result = "invalid".parse::<LogFormat>();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .contains("Invalid log format: 'invalid'"));
    }

    #[test]
    fn test_log_format_display() {
        assert_eq!(LogFormat::Text.to_string(), "text");
        assert_eq!(LogFormat::Json.to_string(), "json");
        assert_eq!(LogFormat::Pretty.to_string(), "pretty");
    }

    #[test]
    #[serial_test::serial]
    fn test_logging_config_from_env() {
        std::env::set_var(LOG_FORMAT_ENV_VAR, "json");
        std::env::set_var(LOG_LEVEL_ENV_VAR, "warn");
        let config = LoggingConfig::from_env(false);
        std::env::remove_var(LOG_FORMAT_ENV_VAR);
        std::env::remove_var(LOG_LEVEL_ENV_VAR);

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "warn");
        assert!(!config.verbose);
    }

    #[test]
    #[serial_test::serial]
    fn test_logging_config_from_env_defaults() {
        std::env::remove_var(LOG_FORMAT_ENV_VAR);
        std::env::remove_var(LOG_LEVEL_ENV_VAR);
        let config = LoggingConfig::from_env(true);

        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.level, "info");
        assert!(config.verbose);
    }

    #[test]
    fn test_verbose_overrides_level() {
        let quiet = LoggingConfig::new(LogFormat::Text, "warn".to_string(), false);
        assert_eq!(quiet.default_directive(), "warn");

        let verbose = LoggingConfig::new(LogFormat::Text, "warn".to_string(), true);
        assert_eq!(verbose.default_directive(), "debug");
    }

    #[test]
    fn test_logging_config_new() {
        let config = LoggingConfig::new(LogFormat::Json, "debug".to_string(), true);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "debug");
        assert!(config.verbose);
    }
}
