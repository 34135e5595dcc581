use std::time::Duration;

use super::transport::TransportMode;
use super::typing::DEFAULT_TYPING_INTERVAL;

pub const DEFAULT_STREAM_PATH: &str = "/chat/stream";
pub const DEFAULT_BATCH_PATH: &str = "/chat";
pub const DEFAULT_FEEDBACK_PATH: &str = "/chat/feedback";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub mode: TransportMode,
    pub endpoint: String,
    pub stream_path: String,
    pub batch_path: String,
    pub feedback_path: String,
    pub typing_interval: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl TransportConfig {
    pub fn new(mode: TransportMode, endpoint: impl Into<String>) -> Self {
        Self {
            mode,
            endpoint: endpoint.into().trim().trim_end_matches('/').to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            batch_path: DEFAULT_BATCH_PATH.to_string(),
            feedback_path: DEFAULT_FEEDBACK_PATH.to_string(),
            typing_interval: DEFAULT_TYPING_INTERVAL,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_typing_interval(mut self, interval: Duration) -> Self {
        self.typing_interval = interval;
        self
    }

    pub fn stream_url(&self) -> String {
        join_url(&self.endpoint, &self.stream_path)
    }

    pub fn batch_url(&self) -> String {
        join_url(&self.endpoint, &self.batch_path)
    }

    pub fn feedback_url(&self) -> String {
        join_url(&self.endpoint, &self.feedback_path)
    }
}

fn join_url(endpoint: &str, path: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        return endpoint.to_string();
    }
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_without_duplicate_slashes() {
        let mut config = TransportConfig::new(TransportMode::Batch, " https://portal.test/api/ ");
        assert_eq!(config.stream_url(), "https://portal.test/api/chat/stream");
        assert_eq!(config.batch_url(), "https://portal.test/api/chat");

        config.feedback_path = "feedback".to_string();
        assert_eq!(config.feedback_url(), "https://portal.test/api/feedback");
    }
}
