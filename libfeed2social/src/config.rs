//! Configuration management for feed2social
//!
//! The whole process is configured from one TOML file, read once at
//! startup and handed to the constructors that need it.
//!
//! ```toml
//! [source]
//! kind = "notion"
//!
//! [notion]
//! database_id = "0123456789abcdef0123456789abcdef"
//! token_file = "~/.config/feed2social/notion.token"
//!
//! [misskey]
//! enabled = true
//! token_file = "~/.config/feed2social/misskey.token"
//!
//! [distribution]
//! recency = "this_week"
//! tags = ["laco_feed"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::types::{NetworkKey, PendingFilter, RecencyWindow};

pub const CONFIG_ENV_VAR: &str = "FEED2SOCIAL_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    pub notion: Option<NotionConfig>,
    pub database: Option<DatabaseConfig>,
    pub misskey: Option<MisskeyConfig>,
    pub bluesky: Option<BlueskyConfig>,
    pub twitter: Option<TwitterConfig>,
    #[serde(default)]
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Notion,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionConfig {
    pub database_id: String,
    pub token_file: String,
    #[serde(default = "default_notion_api_base")]
    pub api_base: String,
    #[serde(default = "default_title_property")]
    pub title_property: String,
    #[serde(default = "default_url_property")]
    pub url_property: String,
    #[serde(default = "default_completed_property")]
    pub completed_property: String,
    /// Checkbox that excludes a page from distribution when ticked
    #[serde(default = "default_skip_property")]
    pub skip_property: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MisskeyConfig {
    pub enabled: bool,
    #[serde(default = "default_misskey_instance")]
    pub instance: String,
    pub token_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueskyConfig {
    pub enabled: bool,
    pub handle: String,
    pub app_password_file: String,
    #[serde(default = "default_bluesky_service")]
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitterConfig {
    pub enabled: bool,
    pub api_key_file: String,
    pub api_secret_file: String,
    pub access_token_file: String,
    pub access_secret_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// `this_week` or a duration such as `7d`
    #[serde(default = "default_recency")]
    pub recency: String,
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout: String,
    /// Attempts per network per run; transient failures only
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_true")]
    pub resolve_titles: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            recency: default_recency(),
            tags: default_tags(),
            publish_timeout: default_publish_timeout(),
            max_attempts: default_max_attempts(),
            resolve_titles: true,
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_notion_api_base() -> String {
    "https://api.notion.com/v1".to_string()
}

fn default_title_property() -> String {
    "title".to_string()
}

fn default_url_property() -> String {
    "url".to_string()
}

fn default_completed_property() -> String {
    "feed2social_completed".to_string()
}

fn default_skip_property() -> Option<String> {
    Some("feed2social".to_string())
}

fn default_misskey_instance() -> String {
    "misskey.io".to_string()
}

fn default_bluesky_service() -> String {
    "https://bsky.social".to_string()
}

fn default_recency() -> String {
    "this_week".to_string()
}

fn default_tags() -> Vec<String> {
    vec!["laco_feed".to_string()]
}

fn default_publish_timeout() -> String {
    "30s".to_string()
}

fn default_max_attempts() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    "feed2social".to_string()
}

fn default_poll_interval() -> String {
    "1h".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match self.source.kind {
            SourceKind::Notion if self.notion.is_none() => {
                return Err(ConfigError::MissingField("notion".to_string()).into());
            }
            SourceKind::Sqlite if self.database.is_none() => {
                return Err(ConfigError::MissingField("database".to_string()).into());
            }
            _ => {}
        }

        if self.distribution.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "distribution.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        // Surface malformed durations at startup rather than mid-run
        self.recency()?;
        for (field, duration) in [
            ("distribution.publish_timeout", self.publish_timeout()?),
            ("schedule.poll_interval", self.poll_interval()?),
        ] {
            if duration.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Networks enabled in this configuration, in `NetworkKey::ALL` order
    pub fn enabled_networks(&self) -> Vec<NetworkKey> {
        NetworkKey::ALL
            .into_iter()
            .filter(|key| match key {
                NetworkKey::Misskey => self.misskey.as_ref().is_some_and(|c| c.enabled),
                NetworkKey::Bluesky => self.bluesky.as_ref().is_some_and(|c| c.enabled),
                NetworkKey::Twitter => self.twitter.as_ref().is_some_and(|c| c.enabled),
            })
            .collect()
    }

    pub fn recency(&self) -> Result<RecencyWindow> {
        self.distribution.recency.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "distribution.recency".to_string(),
                reason: format!(
                    "'{}' is neither 'this_week' nor a duration",
                    self.distribution.recency
                ),
            }
            .into()
        })
    }

    pub fn publish_timeout(&self) -> Result<Duration> {
        parse_duration_field("distribution.publish_timeout", &self.distribution.publish_timeout)
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        parse_duration_field("schedule.poll_interval", &self.schedule.poll_interval)
    }

    /// The fetch filter for the configured networks
    pub fn pending_filter(&self) -> Result<PendingFilter> {
        Ok(PendingFilter::new(self.recency()?, self.enabled_networks()))
    }
}

fn parse_duration_field(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}': {}", value, e),
        }
        .into()
    })
}

/// Read a secret (token, password) from a file
///
/// Surrounding whitespace is trimmed; an empty file is an error.
pub fn read_secret_file(path: &str) -> Result<SecretString> {
    let expanded = shellexpand::tilde(path).to_string();
    let content = std::fs::read_to_string(&expanded).map_err(|e| ConfigError::SecretFile {
        path: expanded.clone(),
        reason: e.to_string(),
    })?;

    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::SecretFile {
            path: expanded,
            reason: "file is empty".to_string(),
        }
        .into());
    }

    Ok(SecretString::from(trimmed.to_string()))
}

/// Resolve the configuration file path, XDG style
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("feed2social").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Feed2SocialError;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
[notion]
database_id = "db"
token_file = "/tmp/notion.token"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.source.kind, SourceKind::Notion);
        assert_eq!(config.recency().unwrap(), RecencyWindow::ThisWeek);
        assert_eq!(config.distribution.tags, vec!["laco_feed".to_string()]);
        assert_eq!(config.distribution.max_attempts, 1);
        assert!(config.distribution.resolve_titles);
        assert_eq!(config.publish_timeout().unwrap(), Duration::from_secs(30));
        assert_eq!(config.poll_interval().unwrap(), Duration::from_secs(3600));
        assert!(config.enabled_networks().is_empty());

        let notion = config.notion.unwrap();
        assert_eq!(notion.api_base, "https://api.notion.com/v1");
        assert_eq!(notion.completed_property, "feed2social_completed");
        assert_eq!(notion.skip_property.as_deref(), Some("feed2social"));
    }

    #[test]
    fn test_enabled_networks_in_fixed_order() {
        let content = format!(
            r#"{}
[twitter]
enabled = true
api_key_file = "k"
api_secret_file = "s"
access_token_file = "t"
access_secret_file = "u"

[bluesky]
enabled = false
handle = "me.bsky.social"
app_password_file = "p"

[misskey]
enabled = true
token_file = "m"
"#,
            MINIMAL
        );
        let config = Config::from_toml(&content).unwrap();
        assert_eq!(
            config.enabled_networks(),
            vec![NetworkKey::Misskey, NetworkKey::Twitter]
        );
        assert_eq!(config.misskey.unwrap().instance, "misskey.io");
    }

    #[test]
    fn test_sqlite_source_requires_database_section() {
        let result = Config::from_toml("[source]\nkind = \"sqlite\"\n");
        match result {
            Err(Feed2SocialError::Config(ConfigError::MissingField(field))) => {
                assert_eq!(field, "database");
            }
            other => panic!("Expected missing database field, got {:?}", other),
        }
    }

    #[test]
    fn test_notion_source_requires_notion_section() {
        let result = Config::from_toml("[source]\nkind = \"notion\"\n");
        assert!(matches!(
            result,
            Err(Feed2SocialError::Config(ConfigError::MissingField(_)))
        ));
    }

    #[test]
    fn test_invalid_recency_rejected() {
        let content = format!("{}\n[distribution]\nrecency = \"someday\"\n", MINIMAL);
        let err = Config::from_toml(&content).unwrap_err();
        assert!(err.to_string().contains("distribution.recency"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let content = format!("{}\n[distribution]\nmax_attempts = 0\n", MINIMAL);
        let err = Config::from_toml(&content).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_zero_durations_rejected() {
        let content = format!("{}\n[distribution]\npublish_timeout = \"0s\"\n", MINIMAL);
        let err = Config::from_toml(&content).unwrap_err();
        assert!(matches!(
            err,
            Feed2SocialError::Config(ConfigError::InvalidValue { ref field, .. })
                if field == "distribution.publish_timeout"
        ));

        let content = format!("{}\n[schedule]\npoll_interval = \"0s\"\n", MINIMAL);
        let err = Config::from_toml(&content).unwrap_err();
        assert!(matches!(
            err,
            Feed2SocialError::Config(ConfigError::InvalidValue { ref field, .. })
                if field == "schedule.poll_interval"
        ));
    }

    #[test]
    fn test_unparseable_toml() {
        let result = Config::from_toml("[notion\n");
        assert!(matches!(
            result,
            Err(Feed2SocialError::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    fn test_read_secret_file_trims() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "  secret-token\n").unwrap();

        let secret = read_secret_file(path.to_str().unwrap()).unwrap();
        assert_eq!(secret.expose_secret(), "secret-token");
    }

    #[test]
    fn test_read_secret_file_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "\n\n").unwrap();

        let err = read_secret_file(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("file is empty"));
    }

    #[test]
    fn test_read_secret_file_missing() {
        let err = read_secret_file("/nonexistent/feed2social/token").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/feed2social/token"));
    }

    #[test]
    #[serial]
    fn test_config_path_from_env() {
        std::env::set_var(CONFIG_ENV_VAR, "/tmp/feed2social-test.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);
        assert_eq!(path, PathBuf::from("/tmp/feed2social-test.toml"));
    }

    #[test]
    #[serial]
    fn test_load_from_env_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        std::env::set_var(CONFIG_ENV_VAR, path.to_str().unwrap());
        let config = Config::load();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(config.unwrap().notion.unwrap().database_id, "db");
    }
}
