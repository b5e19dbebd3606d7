//! Configuration resolution for issuegrade-service
//!
//! Every setting follows CLI → ENV → TOML → default. Jira credentials have
//! no CLI flag (ENV → TOML only) and are optional as a group.

use crate::rubric::RubricConfig;
use crate::source::JiraConfig;
use issuegrade_common::config::{default_data_folder, load_toml_config, resolve_setting, LoggingConfig};
use issuegrade_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const APP_NAME: &str = "issuegrade";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5780";

pub const ENV_BIND_ADDRESS: &str = "ISSUEGRADE_BIND_ADDRESS";
pub const ENV_DATABASE_PATH: &str = "ISSUEGRADE_DATABASE_PATH";
pub const ENV_LOG_LEVEL: &str = "ISSUEGRADE_LOG_LEVEL";
pub const ENV_JIRA_BASE_URL: &str = "ISSUEGRADE_JIRA_BASE_URL";
pub const ENV_JIRA_EMAIL: &str = "ISSUEGRADE_JIRA_EMAIL";
pub const ENV_JIRA_API_TOKEN: &str = "ISSUEGRADE_JIRA_API_TOKEN";

/// `[events]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-connection channel capacity
    pub channel_capacity: usize,
    /// Upper bound for one event send before the connection is dropped
    pub send_timeout_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            send_timeout_ms: 2000,
        }
    }
}

/// `[jobs]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// `max_items` applied when a request does not set one
    pub default_max_items: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { default_max_items: 50 }
    }
}

/// `[jira]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraSection {
    pub base_url: Option<String>,
    pub email: Option<String>,
    pub api_token: Option<String>,
}

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub bind_address: Option<String>,
    pub database_path: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub events: EventsConfig,
    pub jobs: JobsConfig,
    pub rubric: RubricConfig,
    pub jira: JiraSection,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub bind_address: Option<SocketAddr>,
    pub database_path: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_address: SocketAddr,
    pub database_path: PathBuf,
    pub log_level: String,
    pub events: EventsConfig,
    pub jobs: JobsConfig,
    pub rubric: RubricConfig,
    pub jira: Option<JiraConfig>,
}

impl ServiceConfig {
    /// Load the TOML file (if any) and resolve every setting
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let toml_config: TomlConfig = load_toml_config(cli.config_path.as_deref(), APP_NAME)?;
        Self::from_sources(cli, toml_config)
    }

    pub fn from_sources(cli: &CliOverrides, toml_config: TomlConfig) -> Result<Self> {
        let toml_bind = toml_config
            .bind_address
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .map_err(|e| Error::Config(format!("Invalid bind_address {}: {}", addr, e)))
            })
            .transpose()?;
        let default_bind = DEFAULT_BIND_ADDRESS
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("Invalid default bind address: {}", e)))?;
        let bind_address = resolve_setting(cli.bind_address, ENV_BIND_ADDRESS, toml_bind, default_bind)?;

        let database_path = resolve_setting(
            cli.database_path.clone(),
            ENV_DATABASE_PATH,
            toml_config.database_path.clone(),
            default_database_path(),
        )?;

        let log_level = resolve_setting(
            cli.log_level.clone(),
            ENV_LOG_LEVEL,
            Some(toml_config.logging.level.clone()),
            LoggingConfig::default().level,
        )?;

        toml_config
            .rubric
            .validate()
            .map_err(|e| Error::Config(format!("Invalid [rubric] section: {}", e)))?;

        if toml_config.events.channel_capacity == 0 {
            return Err(Error::Config("events.channel_capacity must be at least 1".to_string()));
        }

        let jira = resolve_jira(&toml_config.jira);

        Ok(Self {
            bind_address,
            database_path,
            log_level,
            events: toml_config.events,
            jobs: toml_config.jobs,
            rubric: toml_config.rubric,
            jira,
        })
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.events.send_timeout_ms)
    }
}

/// `<data dir>/issuegrade/issuegrade.db`
pub fn default_database_path() -> PathBuf {
    default_data_folder(APP_NAME).join("issuegrade.db")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn env_or_toml(env_var: &str, toml_value: &Option<String>) -> Option<String> {
    non_blank(std::env::var(env_var).ok()).or_else(|| non_blank(toml_value.clone()))
}

/// Jira settings from ENV → TOML; all three values or none
fn resolve_jira(section: &JiraSection) -> Option<JiraConfig> {
    let base_url = env_or_toml(ENV_JIRA_BASE_URL, &section.base_url);
    let email = env_or_toml(ENV_JIRA_EMAIL, &section.email);
    let api_token = env_or_toml(ENV_JIRA_API_TOKEN, &section.api_token);

    match (base_url, email, api_token) {
        (Some(base_url), Some(email), Some(api_token)) => {
            info!(base_url = %base_url, "Jira source configured");
            Some(JiraConfig::new(base_url, email, api_token))
        }
        (None, None, None) => {
            info!("Jira not configured, item source disabled");
            None
        }
        _ => {
            warn!("Incomplete Jira settings (base_url, email and api_token are all required), item source disabled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::{RubricRule, RuleKind};
    use serial_test::serial;

    fn clear_env() {
        for var in [
            ENV_BIND_ADDRESS,
            ENV_DATABASE_PATH,
            ENV_LOG_LEVEL,
            ENV_JIRA_BASE_URL,
            ENV_JIRA_EMAIL,
            ENV_JIRA_API_TOKEN,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = ServiceConfig::from_sources(&CliOverrides::default(), TomlConfig::default()).unwrap();
        assert_eq!(config.bind_address.to_string(), DEFAULT_BIND_ADDRESS);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.events.channel_capacity, 64);
        assert_eq!(config.send_timeout(), Duration::from_millis(2000));
        assert_eq!(config.jobs.default_max_items, 50);
        assert!(config.database_path.ends_with("issuegrade.db"));
        assert!(config.jira.is_none());
    }

    #[test]
    #[serial]
    fn test_priority_cli_env_toml() {
        clear_env();
        let toml_config: TomlConfig = toml::from_str(
            r#"
            bind_address = "127.0.0.1:7000"
            database_path = "/tmp/from-toml.db"

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        std::env::set_var(ENV_BIND_ADDRESS, "127.0.0.1:8000");
        std::env::set_var(ENV_LOG_LEVEL, "debug");
        let cli = CliOverrides {
            bind_address: Some("127.0.0.1:9000".parse().unwrap()),
            ..Default::default()
        };

        let config = ServiceConfig::from_sources(&cli, toml_config).unwrap();
        assert_eq!(config.bind_address.port(), 9000);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.database_path, PathBuf::from("/tmp/from-toml.db"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_error() {
        clear_env();
        std::env::set_var(ENV_BIND_ADDRESS, "not an address");
        let result = ServiceConfig::from_sources(&CliOverrides::default(), TomlConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_jira_requires_all_values() {
        clear_env();
        let mut toml_config = TomlConfig::default();
        toml_config.jira.base_url = Some("https://example.atlassian.net/".into());
        toml_config.jira.email = Some("bot@example.com".into());

        let config = ServiceConfig::from_sources(&CliOverrides::default(), toml_config.clone()).unwrap();
        assert!(config.jira.is_none());

        std::env::set_var(ENV_JIRA_API_TOKEN, "secret");
        let config = ServiceConfig::from_sources(&CliOverrides::default(), toml_config).unwrap();
        let jira = config.jira.unwrap();
        assert_eq!(jira.base_url, "https://example.atlassian.net");
        assert_eq!(jira.api_token, "secret");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_rubric_rejected() {
        clear_env();
        let mut toml_config = TomlConfig::default();
        toml_config.rubric =
            RubricConfig::with_rules(vec![RubricRule::new(RuleKind::Labels).with_weight(-1.0)]);
        let result = ServiceConfig::from_sources(&CliOverrides::default(), toml_config);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rubric_section_parses() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [rubric]
            passing_threshold = 80.0
            min_description_words = 5

            [[rubric.rules]]
            id = "description_length"
            weight = 2.0
            "#,
        )
        .unwrap();
        assert_eq!(toml_config.rubric.passing_threshold, 80.0);
        assert_eq!(toml_config.rubric.rules.len(), 1);
        assert_eq!(toml_config.rubric.rules[0].id, RuleKind::DescriptionLength);
        assert!(toml_config.rubric.rules[0].enabled);
    }
}
