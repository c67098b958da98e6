mod request_id;

use crate::config::AppConfig;
use crate::stream::StreamSettings;
use crate::transport::HttpTransport;

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    stream_settings: StreamSettings,
    request_ids: RequestIdGenerator,
}

/// Identity of one inbound request.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub seq: u64,
    pub message_id: String,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, transport: HttpTransport) -> Self {
        let stream_settings = StreamSettings::from(&config.stream);
        tracing::debug!(
            backend = %transport.chat_url(),
            tool_arguments = %config.stream.tool_arguments,
            recovery_max_bytes = config.stream.recovery_max_bytes,
            "application state initialized"
        );
        Self {
            config,
            transport,
            stream_settings,
            request_ids: RequestIdGenerator::new(),
        }
    }

    #[must_use]
    pub fn stream_settings(&self) -> &StreamSettings {
        &self.stream_settings
    }

    #[must_use]
    pub fn next_request(&self) -> RequestIdentity {
        let seq = self.request_ids.next_seq();
        RequestIdentity {
            seq,
            message_id: self.request_ids.message_id(seq),
        }
    }
}
