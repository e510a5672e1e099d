//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/beacon/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/beacon/` (~/.config/beacon/)
//! - Data: `$XDG_DATA_HOME/beacon/` (~/.local/share/beacon/)
//! - State/Logs: `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)
//!
//! The config is loaded once by each binary and its sections are handed to
//! the components that need them. Nothing in the library reads it globally.

use crate::error::{Error, Result};
use crate::types::InsightType;
use serde::Deserialize;
use std::path::PathBuf;

/// Env var that overrides `slack.bot_token`
pub const SLACK_TOKEN_ENV: &str = "BEACON_SLACK_TOKEN";
/// Env var that overrides `github.token`
pub const GITHUB_TOKEN_ENV: &str = "BEACON_GITHUB_TOKEN";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Escalation pass configuration
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Daily brief configuration
    #[serde(default)]
    pub brief: BriefConfig,

    /// Slack client configuration (DMs, channel posts, brief delivery)
    #[serde(default)]
    pub slack: SlackConfig,

    /// GitHub client configuration (external item comments)
    #[serde(default)]
    pub github: GitHubConfig,

    /// Mail relay configuration (brief delivery by email)
    #[serde(default)]
    pub email: EmailConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Escalation pass configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EscalationConfig {
    /// Insight types the pass considers. Empty means every type.
    #[serde(default = "default_escalation_types")]
    pub insight_types: Vec<InsightType>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            insight_types: default_escalation_types(),
        }
    }
}

fn default_escalation_types() -> Vec<InsightType> {
    vec![InsightType::StalePr]
}

/// Daily brief configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BriefConfig {
    /// Insight types left out of the brief because escalation already covers them
    #[serde(default = "default_brief_exclude_types")]
    pub exclude_types: Vec<InsightType>,

    /// Prefix for the email subject line
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

impl Default for BriefConfig {
    fn default() -> Self {
        Self {
            exclude_types: default_brief_exclude_types(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

fn default_brief_exclude_types() -> Vec<InsightType> {
    vec![InsightType::StalePr]
}

fn default_subject_prefix() -> String {
    "Daily Brief".to_string()
}

/// Slack Web API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    /// Bot token (xoxb-...)
    pub bot_token: Option<String>,

    /// Web API base URL
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: default_slack_api_base(),
            timeout_secs: default_client_timeout(),
        }
    }
}

impl SlackConfig {
    /// Check if the Slack client can be built
    pub fn is_ready(&self) -> bool {
        self.bot_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::Config(
                "slack.bot_token is required to use the Slack client".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "slack.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}

/// GitHub REST API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    /// Personal access or app installation token
    pub token: Option<String>,

    /// REST API base URL
    #[serde(default = "default_github_api_base")]
    pub api_base: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: default_github_api_base(),
            timeout_secs: default_client_timeout(),
        }
    }
}

impl GitHubConfig {
    /// Check if the GitHub client can be built
    pub fn is_ready(&self) -> bool {
        self.token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::Config(
                "github.token is required to use the GitHub client".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "github.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

/// HTTP mail relay configuration
///
/// The relay accepts a JSON message and handles SMTP on our behalf.
#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    /// Relay endpoint (e.g., `https://mail.example.com/v1/send`)
    pub relay_url: Option<String>,

    /// API key sent as a bearer token
    pub api_key: Option<String>,

    /// Sender address
    pub from_address: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            api_key: None,
            from_address: None,
            timeout_secs: default_client_timeout(),
        }
    }
}

impl EmailConfig {
    /// Check if the mail relay client can be built
    pub fn is_ready(&self) -> bool {
        self.relay_url.is_some() && self.from_address.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.relay_url.is_none() {
            return Err(Error::Config(
                "email.relay_url is required to send email".to_string(),
            ));
        }
        if self.from_address.is_none() {
            return Err(Error::Config(
                "email.from_address is required to send email".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "email.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_client_timeout() -> u64 {
    10
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Replace client tokens with values from the environment when present.
    ///
    /// Lets deployments keep secrets out of the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Some(token) = non_empty_env(SLACK_TOKEN_ENV) {
            self.slack.bot_token = Some(token);
        }
        if let Some(token) = non_empty_env(GITHUB_TOKEN_ENV) {
            self.github.token = Some(token);
        }
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/beacon/config.toml` (~/.config/beacon/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("beacon").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/beacon/` (~/.local/share/beacon/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("beacon")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("beacon")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/beacon/beacon.db` (~/.local/share/beacon/beacon.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("beacon.db")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.escalation.insight_types, vec![InsightType::StalePr]);
        assert_eq!(config.brief.exclude_types, vec![InsightType::StalePr]);
        assert_eq!(config.slack.api_base, "https://slack.com/api");
        assert_eq!(config.github.api_base, "https://api.github.com");
        assert_eq!(config.logging.level, "info");
        assert!(!config.slack.is_ready());
        assert!(!config.github.is_ready());
        assert!(!config.email.is_ready());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[escalation]
insight_types = ["stale_pr", "budget_alert"]

[brief]
exclude_types = []
subject_prefix = "Morning digest"

[slack]
bot_token = "xoxb-test"
timeout_secs = 3

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.escalation.insight_types,
            vec![InsightType::StalePr, InsightType::BudgetAlert]
        );
        assert!(config.brief.exclude_types.is_empty());
        assert_eq!(config.brief.subject_prefix, "Morning digest");
        assert!(config.slack.is_ready());
        assert_eq!(config.slack.timeout_secs, 3);
        assert_eq!(config.slack.api_base, "https://slack.com/api");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_unknown_insight_type_is_rejected() {
        let toml = r#"
[escalation]
insight_types = ["not_a_type"]
"#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_client_validation() {
        assert!(SlackConfig::default().validate().is_err());
        let slack = SlackConfig {
            bot_token: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(slack.validate().is_err());
        let slack = SlackConfig {
            bot_token: Some("xoxb-test".to_string()),
            ..Default::default()
        };
        assert!(slack.validate().is_ok());

        let github = GitHubConfig {
            token: Some("ghp_test".to_string()),
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(github.validate().is_err());

        let email = EmailConfig {
            relay_url: Some("https://mail.example.com/send".to_string()),
            ..Default::default()
        };
        assert!(!email.is_ready());
        assert!(email.validate().is_err());
        let email = EmailConfig {
            from_address: Some("beacon@example.com".to_string()),
            ..email
        };
        assert!(email.is_ready());
        assert!(email.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[github]\ntoken = \"ghp_file\"\napi_base = \"https://ghe.example.com/api/v3\""
        )
        .unwrap();

        let config = Config::load_from(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.github.token.as_deref(), Some("ghp_file"));
        assert_eq!(config.github.api_base, "https://ghe.example.com/api/v3");
        assert_eq!(config.github.timeout_secs, 10);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[slack\nbot_token = ").unwrap();
        let err = Config::load_from(&file.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
