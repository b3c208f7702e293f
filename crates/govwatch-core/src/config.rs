//! Configuration management for govwatch
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `GOVWATCH__*` environment variables (`GOVWATCH__THRESHOLDS__WARNING=70`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{ChannelConfig, Thresholds};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Warning and critical percentages
    pub thresholds: Thresholds,

    /// Limit monitoring configuration
    pub monitoring: MonitoringConfig,

    /// Deployment correlation configuration
    pub deployment: DeploymentConfig,

    /// Alerting configuration
    pub alerting: AlertingConfig,

    /// Platform connection
    pub platform: PlatformConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                debug!(path = %path.display(), "Loading configuration file");
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default) = default_config_path().filter(|p| p.exists()) {
                    debug!(path = %default.display(), "Loading default configuration file");
                    builder = builder.add_source(config::File::from(default).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("GOVWATCH")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        self.alerting.validate()?;

        if self.monitoring.interval.is_zero() {
            return Err(Error::config("monitoring.interval must be positive"));
        }
        if self.deployment.polling_rate.is_zero() {
            return Err(Error::config("deployment.polling_rate must be positive"));
        }
        Ok(())
    }
}

/// `~/.config/govwatch/config.toml` (platform equivalent)
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "govwatch", "govwatch")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Limit monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Time between limit checks
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Random extra delay added to each check
    #[serde(with = "humantime_serde")]
    pub jitter: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            jitter: Duration::ZERO,
        }
    }
}

/// Deployment correlation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Time between status checks while a deployment runs
    #[serde(with = "humantime_serde")]
    pub polling_rate: Duration,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            polling_rate: Duration::from_secs(2),
        }
    }
}

/// Alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Master switch
    pub enabled: bool,
    /// Delivery channels
    pub channels: Vec<ChannelConfig>,
    /// Minimum time between repeated critical alerts for one subject
    #[serde(with = "humantime_serde")]
    pub critical_cooldown: Duration,
    /// Minimum time between repeated warning alerts for one subject
    #[serde(with = "humantime_serde")]
    pub warning_cooldown: Duration,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: Vec::new(),
            critical_cooldown: Duration::from_secs(5 * 60),
            warning_cooldown: Duration::from_secs(10 * 60),
        }
    }
}

impl AlertingConfig {
    /// Critical alerts must be allowed to re-fire sooner than warnings
    pub fn validate(&self) -> Result<()> {
        if self.critical_cooldown >= self.warning_cooldown {
            return Err(Error::config(format!(
                "alerting.critical_cooldown ({}) must be shorter than alerting.warning_cooldown ({})",
                humantime::format_duration(self.critical_cooldown),
                humantime::format_duration(self.warning_cooldown)
            )));
        }
        Ok(())
    }
}

/// Platform connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Base URL of the org (`https://example.my.salesforce.com`)
    pub instance_url: String,
    /// Session token used as bearer credential
    pub access_token: String,
    /// REST API version
    pub api_version: String,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Org label shown in alerts
    pub org: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            instance_url: String::new(),
            access_token: String::new(),
            api_version: "59.0".to_string(),
            request_timeout: Duration::from_secs(30),
            org: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.thresholds.warning, 80.0);
        assert_eq!(config.thresholds.critical, 95.0);
        assert_eq!(config.monitoring.interval, Duration::from_secs(30));
        assert_eq!(config.deployment.polling_rate, Duration::from_secs(2));
        assert!(config.alerting.critical_cooldown < config.alerting.warning_cooldown);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r##"
[thresholds]
warning = 70.0
critical = 90.0

[monitoring]
interval = "1m"

[alerting]
critical_cooldown = "2m"
warning_cooldown = "4m"

[[alerting.channels]]
type = "console"

[[alerting.channels]]
type = "slack"
webhook_url = "https://hooks.slack.com/services/T000/B000/XXX"
channel = "#ops"

[platform]
instance_url = "https://example.my.salesforce.com"
org = "prod"
"##
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.thresholds.warning, 70.0);
        assert_eq!(config.monitoring.interval, Duration::from_secs(60));
        assert_eq!(config.alerting.critical_cooldown, Duration::from_secs(120));
        assert_eq!(config.alerting.channels.len(), 2);
        assert!(matches!(
            &config.alerting.channels[1],
            ChannelConfig::Slack { channel: Some(channel), .. } if channel == "#ops"
        ));
        assert_eq!(config.platform.org.as_deref(), Some("prod"));
        assert_eq!(config.platform.api_version, "59.0");
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.thresholds = Thresholds {
            warning: 96.0,
            critical: 90.0,
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_warning_cooldown_not_longer_than_critical() {
        let mut config = Config::default();
        config.alerting.warning_cooldown = config.alerting.critical_cooldown;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/govwatch.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
