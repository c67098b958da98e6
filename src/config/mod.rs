pub mod validation;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// How streamed tool-call `arguments` fragments are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolArgumentsMode {
    /// Detect per fragment: extension of the accumulated string is cumulative,
    /// an exact replay is ignored, anything else is an incremental piece.
    #[default]
    Auto,
    /// Every fragment is the full argument string so far.
    Cumulative,
    /// Every fragment is a new piece to append.
    Incremental,
}

impl fmt::Display for ToolArgumentsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolArgumentsMode::Auto => write!(f, "auto"),
            ToolArgumentsMode::Cumulative => write!(f, "cumulative"),
            ToolArgumentsMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_max_request_body_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
            base_path: String::new(),
            http_use_env_proxy: false,
            max_request_body_bytes: default_max_request_body_bytes(),
        }
    }
}

/// Chat-completions backend the bridge forwards to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
}

fn default_chat_path() -> String {
    "/chat/completions".to_string()
}

impl BackendConfig {
    /// Full URL of the chat completions endpoint.
    #[must_use]
    pub fn chat_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.chat_path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

/// Streaming engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_recovery_max_bytes")]
    pub recovery_max_bytes: usize,
    #[serde(default = "default_recovery_max_age_ms")]
    pub recovery_max_age_ms: u64,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub tool_arguments: ToolArgumentsMode,
}

fn default_recovery_max_bytes() -> usize {
    256 * 1024
}
fn default_recovery_max_age_ms() -> u64 {
    30_000
}
fn default_max_line_bytes() -> usize {
    1024 * 1024
}
fn default_channel_capacity() -> usize {
    32
}

impl StreamConfig {
    #[must_use]
    pub fn recovery_max_age(&self) -> Duration {
        Duration::from_millis(self.recovery_max_age_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            recovery_max_bytes: default_recovery_max_bytes(),
            recovery_max_age_ms: default_recovery_max_age_ms(),
            max_line_bytes: default_max_line_bytes(),
            channel_capacity: default_channel_capacity(),
            tool_arguments: ToolArgumentsMode::default(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Parse and validate configuration from YAML text.
///
/// `server.base_path` is normalised to a leading `/` without a trailing one.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let mut config: AppConfig = serde_yaml::from_str(contents)?;
    config.server.base_path = normalize_base_path(&config.server.base_path);
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "backend:\n  base_url: http://127.0.0.1:9000/v1\n";

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 8000);
        assert!(!config.server.http_use_env_proxy);
        assert_eq!(config.server.http_pool_max_idle_per_host, 16);
        assert_eq!(config.stream.tool_arguments, ToolArgumentsMode::Auto);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.timeout, 180);
        assert_eq!(config.server.max_request_body_bytes, 2 * 1024 * 1024);
        assert_eq!(config.backend.chat_path, "/chat/completions");
        assert!(config.backend.api_key.is_none());
        assert_eq!(config.stream.recovery_max_bytes, 262_144);
        assert_eq!(config.stream.recovery_max_age(), Duration::from_secs(30));
        assert_eq!(config.stream.max_line_bytes, 1_048_576);
        assert_eq!(config.stream.channel_capacity, 32);
        assert_eq!(config.features.log_level, "INFO");
        assert_eq!(config.features.log_format, LogFormat::Text);
    }

    #[test]
    fn test_json_log_format() {
        let yaml = format!("{MINIMAL}features:\n  log_format: json\n");
        let config = parse_config(&yaml).unwrap();
        assert_eq!(config.features.log_format, LogFormat::Json);

        let bad = format!("{MINIMAL}features:\n  log_format: xml\n");
        assert!(matches!(parse_config(&bad), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_chat_url_joins_slashes() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(
            config.backend.chat_url(),
            "http://127.0.0.1:9000/v1/chat/completions"
        );

        let mut backend = config.backend;
        backend.base_url = "http://h/v1/".to_string();
        backend.chat_path = "chat/completions".to_string();
        assert_eq!(backend.chat_url(), "http://h/v1/chat/completions");
    }

    #[test]
    fn test_base_path_normalised() {
        let yaml = format!("server:\n  base_path: api/\n{MINIMAL}");
        let config = parse_config(&yaml).unwrap();
        assert_eq!(config.server.base_path, "/api");
        assert_eq!(normalize_base_path("/"), "");
    }

    #[test]
    fn test_tool_arguments_mode_serde() {
        let json = serde_json::to_string(&ToolArgumentsMode::Incremental).unwrap();
        assert_eq!(json, "\"incremental\"");
        let mode: ToolArgumentsMode = serde_json::from_str("\"cumulative\"").unwrap();
        assert_eq!(mode, ToolArgumentsMode::Cumulative);
    }
}
