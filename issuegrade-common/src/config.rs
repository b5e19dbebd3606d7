//! Configuration file loading and folder resolution
//!
//! Every setting is resolved with the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Logging section shared by every binary's TOML file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Resolve one setting following the CLI → ENV → TOML → default order
///
/// An environment variable that is set but does not parse is a configuration
/// error rather than a silent fallback.
pub fn resolve_setting<T>(
    cli_value: Option<T>,
    env_var_name: &str,
    toml_value: Option<T>,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = cli_value {
        return Ok(value);
    }

    if let Ok(raw) = std::env::var(env_var_name) {
        return raw.trim().parse::<T>().map_err(|e| {
            Error::Config(format!("Invalid value for {}: {} ({})", env_var_name, raw, e))
        });
    }

    Ok(toml_value.unwrap_or(default))
}

/// Load a TOML config file into `T`
///
/// * `explicit_path` - path given on the command line; it must exist
/// * `app_name` - used to locate the platform config file when no path is given
///
/// Falls back to `T::default()` when no config file is present.
pub fn load_toml_config<T>(explicit_path: Option<&Path>, app_name: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let path = match explicit_path {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_file(app_name) {
            Some(path) => path,
            None => {
                tracing::debug!(app = app_name, "No config file found, using defaults");
                return Ok(T::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    tracing::info!(path = %path.display(), "Loaded config file");
    Ok(config)
}

/// Locate the platform config file for `app_name`, if one exists
///
/// Linux checks `~/.config/<app>/config.toml` then `/etc/<app>/config.toml`;
/// other platforms only check the user config directory.
pub fn default_config_file(app_name: &str) -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(app_name).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(app_name).join("config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default data folder path
pub fn default_data_folder(app_name: &str) -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/<app> (or /var/lib/<app> for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join(app_name))
            .unwrap_or_else(|| PathBuf::from("/var/lib").join(app_name))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join(app_name))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support").join(app_name))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join(app_name))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData").join(app_name))
    } else {
        PathBuf::from(format!("./{}_data", app_name))
    }
}
