//! Bootstrap configuration loading
//!
//! Resolution priority for the configuration file:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`LMIO_CONFIG`)
//! 3. Platform config directory (`<config_dir>/lmio/config.toml`)
//! 4. Compiled defaults (a missing file is a warning, not an error)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "LMIO_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Remote backend endpoints and OAuth client
    #[serde(default)]
    pub backend: BackendConfig,

    /// Navigation behaviour
    #[serde(default)]
    pub navigation: NavigationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where persisted preferences live (defaults to the platform data dir)
    #[serde(default)]
    pub preferences_path: Option<PathBuf>,
}

/// Remote backend endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Metadata/media API root
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Content (file download/upload) API root
    #[serde(default = "default_content_url")]
    pub content_url: String,

    /// OAuth2 client id
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Redirect target for the implicit grant, usually the app's own origin
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            content_url: default_content_url(),
            client_id: default_client_id(),
            redirect_uri: default_redirect_uri(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Navigation behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavigationConfig {
    /// Save dirty landmarks before moving to another asset instead of asking
    #[serde(default = "default_auto_save")]
    pub auto_save: bool,

    /// Asset index to open when nothing is current yet
    #[serde(default)]
    pub initial_index: Option<usize>,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            auto_save: default_auto_save(),
            initial_index: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_api_url() -> String {
    "https://api.dropbox.com/1".to_string()
}

fn default_content_url() -> String {
    "https://api-content.dropbox.com/1".to_string()
}

fn default_client_id() -> String {
    "jwda9p0msmkfora".to_string()
}

fn default_redirect_uri() -> String {
    "http://localhost:4000/".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_auto_save() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Pick the configuration file path by priority
///
/// Returns `None` when neither an explicit path nor the platform file exists.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let platform = dirs::config_dir().map(|d| d.join("lmio").join("config.toml"))?;
    platform.exists().then_some(platform)
}

/// Load configuration from a TOML file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load configuration, falling back to defaults when no file is found
///
/// An explicitly named file that cannot be parsed is still an error.
pub fn load_or_default(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) if path.exists() => {
            info!("Loading configuration from {}", path.display());
            load_toml_config(&path)
        }
        Some(path) => {
            warn!("Config file {} not found, using defaults", path.display());
            Ok(TomlConfig::default())
        }
        None => {
            info!("No config file found, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Write configuration to a TOML file, creating parent directories
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default location of the persisted preference file
pub fn default_preferences_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("lmio").join("preferences.json"))
        .unwrap_or_else(|| PathBuf::from("./lmio_preferences.json"))
}
