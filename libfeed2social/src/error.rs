//! Error types for feed2social

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Feed2SocialError>;

#[derive(Error, Debug)]
pub enum Feed2SocialError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Feed2SocialError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Feed2SocialError::Config(_) => 2,
            Feed2SocialError::InvalidInput(_) => 2,
            Feed2SocialError::Source(_) => 1,
            Feed2SocialError::Platform(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to read secret file {path}: {reason}")]
    SecretFile { path: String, reason: String },
}

/// Errors raised by a content source while fetching or saving items
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Request failed: {0}")]
    Http(String),

    #[error("Source API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode item {item_id}: {reason}")]
    Decode { item_id: String, reason: String },

    #[error("Database operation failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for SourceError {
    fn from(error: reqwest::Error) -> Self {
        SourceError::Http(error.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl PlatformError {
    /// Whether retrying the same request could succeed
    ///
    /// Network trouble, rate limiting and timeouts are transient. Rejected
    /// credentials or content will be rejected again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Network(_) | PlatformError::RateLimit(_) | PlatformError::Timeout(_)
        )
    }

    /// Classify an HTTP status returned by a network's API
    pub fn from_status(network: &str, status: u16, body: &str) -> Self {
        let detail = format!("{} returned HTTP {}: {}", network, status, body.trim());
        match status {
            401 | 403 => PlatformError::Authentication(detail),
            429 => PlatformError::RateLimit(detail),
            400..=499 => PlatformError::Validation(detail),
            _ => PlatformError::Posting(detail),
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            PlatformError::Timeout(error.to_string())
        } else {
            PlatformError::Network(error.to_string())
        }
    }
}
