use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Default API URL
const DEFAULT_API_URL: &str = "https://api.studiobook.app/api/v1";

/// Default request timeout; also bounds how long a hung refresh can hold
/// the refresh lock
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Environment variable name for API URL override
pub const ENV_API_URL: &str = "STUDIOBOOK_API_URL";

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    api: Option<ApiSection>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiSection {
    /// API endpoint URL (e.g., "https://staging.studiobook.app/api/v1")
    api_url: Option<String>,
    /// Global request timeout in seconds
    timeout_secs: Option<u64>,
}

/// Runtime API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL for API calls, without trailing slash
    pub api_url: String,
    pub timeout: Duration,
    /// Source of the API URL (for logging)
    pub source: ConfigSource,
}

impl ApiConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Self {
            api_url: normalize_url(&api_url).unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            source: ConfigSource::Default,
        }
    }
}

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Loaded from environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

fn normalize_url(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/');
    (!url.is_empty()).then(|| url.to_string())
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    crate::auth::get_config_dir()
        .ok()
        .map(|dir| dir.join("config.toml"))
}

/// Load configuration from the config file
fn load_config_file() -> Option<ConfigFile> {
    let path = get_config_file_path()?;

    if !path.exists() {
        return None;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Load API configuration with priority:
/// 1. Environment variable (STUDIOBOOK_API_URL)
/// 2. Config file (~/.config/studiobook/config.toml)
/// 3. Default values
///
/// `timeout_secs` is only read from the config file.
pub fn load_api_config() -> ApiConfig {
    resolve(std::env::var(ENV_API_URL).ok(), load_config_file())
}

fn resolve(env_url: Option<String>, file: Option<ConfigFile>) -> ApiConfig {
    let section = file.and_then(|f| f.api).unwrap_or_default();
    let timeout = Duration::from_secs(
        section
            .timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
    );

    // Priority 1: Environment variable
    if let Some(url) = env_url.as_deref().and_then(normalize_url) {
        tracing::info!("Using API URL from environment variable: {}", url);
        return ApiConfig {
            api_url: url,
            timeout,
            source: ConfigSource::Environment,
        };
    }

    // Priority 2: Config file
    if let Some(url) = section.api_url.as_deref().and_then(normalize_url) {
        tracing::info!("Using API URL from config file: {}", url);
        return ApiConfig {
            api_url: url,
            timeout,
            source: ConfigSource::ConfigFile,
        };
    }

    // Priority 3: Default values
    tracing::debug!("Using default API URL: {}", DEFAULT_API_URL);
    ApiConfig {
        api_url: DEFAULT_API_URL.to_string(),
        timeout,
        source: ConfigSource::Default,
    }
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/studiobook/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# Studiobook Configuration
# Place this file at: ~/.config/studiobook/config.toml

[api]
# API endpoint URL (overridden by STUDIOBOOK_API_URL)
# Default: https://api.studiobook.app/api/v1
# api_url = "https://staging.studiobook.app/api/v1"

# Request timeout in seconds, applied to every call including token refresh
# timeout_secs = 30
"#
    .to_string()
}
