use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_backend(config)?;
    validate_stream_config(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if server.max_request_body_bytes == 0 {
        return Err(validation_err(
            "server.max_request_body_bytes must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_backend(config: &AppConfig) -> Result<(), ConfigError> {
    let backend = &config.backend;
    let parsed = url::Url::parse(backend.base_url.trim()).map_err(|err| {
        validation_err(format!("backend.base_url is not a valid URL: {err}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(
            "backend.base_url must start with http:// or https://",
        ));
    }
    if let Some(api_key) = backend.api_key.as_deref() {
        if api_key.trim().is_empty() {
            return Err(validation_err("backend.api_key cannot be empty when set"));
        }
    }
    if backend.chat_path.trim().is_empty() {
        return Err(validation_err("backend.chat_path cannot be empty"));
    }
    for (name, value) in &backend.extra_headers {
        if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(validation_err(format!(
                "backend.extra_headers: invalid header name '{name}'"
            )));
        }
        if http::HeaderValue::from_str(value).is_err() {
            return Err(validation_err(format!(
                "backend.extra_headers: invalid value for header '{name}'"
            )));
        }
    }
    validate_proxy_url("proxy", backend.proxy.as_deref())
}

fn validate_proxy_url(field_name: &str, proxy: Option<&str>) -> Result<(), ConfigError> {
    let Some(proxy) = proxy.map(str::trim) else {
        return Ok(());
    };
    if proxy.is_empty() {
        return Err(validation_err(format!(
            "backend.{field_name} cannot be empty when set"
        )));
    }
    let parsed = url::Url::parse(proxy).map_err(|err| {
        validation_err(format!("backend.{field_name} is not a valid URL: {err}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "backend.{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_stream_config(config: &AppConfig) -> Result<(), ConfigError> {
    let stream = &config.stream;
    if stream.recovery_max_bytes == 0 {
        return Err(validation_err(
            "stream.recovery_max_bytes must be greater than 0",
        ));
    }
    if stream.recovery_max_age_ms == 0 {
        return Err(validation_err(
            "stream.recovery_max_age_ms must be greater than 0",
        ));
    }
    if stream.max_line_bytes == 0 {
        return Err(validation_err("stream.max_line_bytes must be greater than 0"));
    }
    if stream.channel_capacity == 0 {
        return Err(validation_err(
            "stream.channel_capacity must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn make_valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            backend: BackendConfig {
                base_url: "https://api.example.com/v1".to_string(),
                api_key: Some("sk-test".to_string()),
                chat_path: "/chat/completions".to_string(),
                proxy: None,
                extra_headers: std::collections::BTreeMap::new(),
            },
            stream: StreamConfig::default(),
            features: FeaturesConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = make_valid_config();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = make_valid_config();
        config.backend.base_url = "ftp://bad.url".to_string();
        assert!(validate_config(&config).is_err());
        config.backend.base_url = "not a url".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_api_key_optional_but_not_blank() {
        let mut config = make_valid_config();
        config.backend.api_key = None;
        assert!(validate_config(&config).is_ok());
        config.backend.api_key = Some("  ".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_proxy_scheme() {
        let mut config = make_valid_config();
        config.backend.proxy = Some("socks5://127.0.0.1:1080".to_string());
        assert!(validate_config(&config).is_err());
        config.backend.proxy = Some("http://127.0.0.1:3128".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_extra_header() {
        let mut config = make_valid_config();
        config
            .backend
            .extra_headers
            .insert("bad header".to_string(), "x".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.features.log_level = "VERBOSE".to_string();
        assert!(validate_config(&config).is_err());
        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_pool_max_idle_per_host() {
        let mut config = make_valid_config();
        config.server.http_pool_max_idle_per_host = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_runtime_worker_threads() {
        let mut config = make_valid_config();
        config.server.runtime_worker_threads = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_stream_limits_rejected() {
        let mut config = make_valid_config();
        config.stream.recovery_max_bytes = 0;
        assert!(validate_config(&config).is_err());

        let mut config = make_valid_config();
        config.stream.recovery_max_age_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = make_valid_config();
        config.stream.max_line_bytes = 0;
        assert!(validate_config(&config).is_err());

        let mut config = make_valid_config();
        config.stream.channel_capacity = 0;
        assert!(validate_config(&config).is_err());
    }
}
