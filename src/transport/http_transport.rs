use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::config::{BackendConfig, ServerConfig};
use crate::error::BridgeError;

use super::retry_policy::{status_retry_delay, transport_retry_delay};

const ERROR_BODY_MAX_CHARS: usize = 512;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, BridgeError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout);

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| BridgeError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| BridgeError::Transport(format!("Failed to build HTTP client: {err}")))
}

fn build_backend_headers(backend: &BackendConfig) -> Result<http::HeaderMap, BridgeError> {
    let mut headers = http::HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(api_key) = backend.api_key.as_deref() {
        let value = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|err| BridgeError::Config(format!("Invalid backend api_key: {err}")))?;
        headers.insert(AUTHORIZATION, value);
    }
    for (name, value) in &backend.extra_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| BridgeError::Config(format!("Invalid header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| BridgeError::Config(format!("Invalid header value for '{name}': {err}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// HTTP client for the chat completions backend.
pub struct HttpTransport {
    client: reqwest::Client,
    chat_url: url::Url,
    headers: http::HeaderMap,
}

impl HttpTransport {
    /// Build the pooled client and the fixed request headers.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for an unusable URL, proxy or header, or
    /// [`BridgeError::Transport`] if the client cannot be built.
    pub fn new(server: &ServerConfig, backend: &BackendConfig) -> Result<Self, BridgeError> {
        let pool_idle_timeout = if server.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(server.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            server.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(server.timeout),
            server.http_use_env_proxy,
            backend.proxy.as_deref(),
        )?;
        let chat_url = url::Url::parse(&backend.chat_url())
            .map_err(|err| BridgeError::Config(format!("Invalid backend URL: {err}")))?;
        Ok(Self {
            client,
            chat_url,
            headers: build_backend_headers(backend)?,
        })
    }

    #[must_use]
    pub fn chat_url(&self) -> &url::Url {
        &self.chat_url
    }

    #[must_use]
    pub fn headers(&self) -> &http::HeaderMap {
        &self.headers
    }

    /// POST a chat completions body and return the successful response.
    ///
    /// Retriable statuses and transient transport errors are retried before
    /// any response byte is consumed. The body of a streaming response is left
    /// unread for the caller.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] when the request cannot be executed
    /// and [`BridgeError::Upstream`] for a non-2xx final status.
    pub async fn send_chat(&self, body: Bytes, stream: bool) -> Result<reqwest::Response, BridgeError> {
        let mut headers = self.headers.clone();
        if stream {
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        } else {
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        }

        let mut attempt = 0;
        let response = loop {
            let mut request = reqwest::Request::new(http::Method::POST, self.chat_url.clone());
            *request.headers_mut() = headers.clone();
            *request.body_mut() = Some(reqwest::Body::from(body.clone()));

            match self.client.execute(request).await {
                Ok(response) => {
                    let Some(delay) =
                        status_retry_delay(response.status(), response.headers(), attempt)
                    else {
                        break response;
                    };
                    tracing::debug!(
                        status = response.status().as_u16(),
                        retry_attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        "retrying backend request after retriable status"
                    );
                    drop(response);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let message = err.to_string();
                    let Some(delay) = transport_retry_delay(&message, attempt) else {
                        return Err(BridgeError::Transport(message));
                    };
                    tracing::debug!(
                        retry_attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        error = %message,
                        "retrying backend request after transport error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
            attempt += 1;
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let raw = response.text().await.unwrap_or_default();
        let message = upstream_error_message(&raw);
        tracing::warn!(status = status.as_u16(), message = %message, "backend returned error status");
        Err(BridgeError::Upstream {
            status: status.as_u16(),
            message,
        })
    }
}

/// Best-effort single-line message from a backend error body.
///
/// Prefers `error.message` / `message` from a JSON body, else the raw text,
/// truncated and with line breaks flattened.
pub(crate) fn upstream_error_message(raw: &str) -> String {
    let extracted = serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .or_else(|| value.get("message"))
                .or_else(|| value.get("error").filter(|e| e.is_string()))
                .and_then(|v| v.as_str().map(str::to_string))
        });
    let text = extracted.unwrap_or_else(|| raw.trim().to_string());
    if text.is_empty() {
        return "backend returned an empty error body".to_string();
    }

    let mut out = String::with_capacity(text.len().min(ERROR_BODY_MAX_CHARS + 3));
    for (count, ch) in text.chars().enumerate() {
        if count == ERROR_BODY_MAX_CHARS {
            out.push_str("...");
            break;
        }
        out.push(if ch.is_control() { ' ' } else { ch });
    }
    out
}
