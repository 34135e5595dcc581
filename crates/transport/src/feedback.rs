use std::sync::Arc;

use snafu::ResultExt;

use super::auth::TokenProvider;
use super::config::TransportConfig;
use super::error::{SendRequestSnafu, TransportResult};
use super::http::{authorize, build_client, ensure_success};
use super::protocol::FeedbackRequest;

/// Posts answer evaluations without blocking the caller.
#[derive(Clone)]
pub struct HttpFeedbackClient {
    client: reqwest::Client,
    url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpFeedbackClient {
    pub fn new(config: &TransportConfig, tokens: Arc<dyn TokenProvider>) -> TransportResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            url: config.feedback_url(),
            tokens,
        })
    }

    pub async fn send(&self, feedback: &FeedbackRequest) -> TransportResult<()> {
        let builder = self.client.post(&self.url).json(feedback);
        let response = authorize(builder, self.tokens.as_ref())
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "send-feedback",
                url: self.url.clone(),
            })?;
        ensure_success(response, "feedback-http-status").await?;
        Ok(())
    }

    /// Spawns the submission; failures are logged and never retried.
    pub fn submit(&self, feedback: FeedbackRequest) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                turn_id = %feedback.turn_id,
                "dropping feedback submission because no async runtime is running"
            );
            return;
        };

        let client = self.clone();
        runtime.spawn(async move {
            match client.send(&feedback).await {
                Ok(()) => tracing::debug!(
                    turn_id = %feedback.turn_id,
                    version_index = feedback.version_index,
                    "feedback submitted"
                ),
                Err(error) => tracing::warn!(
                    turn_id = %feedback.turn_id,
                    version_index = feedback.version_index,
                    error = %error,
                    "feedback submission failed"
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::StaticToken;
    use crate::protocol::Evaluation;
    use crate::transport::TransportMode;

    fn feedback() -> FeedbackRequest {
        FeedbackRequest {
            session_id: "s1".to_string(),
            turn_id: "t1".to_string(),
            version_index: 1,
            timestamp: chrono::Utc::now(),
            evaluation: Evaluation::Good,
            reasons: Vec::new(),
            comment: Some("helpful".to_string()),
        }
    }

    #[tokio::test]
    async fn send_posts_camel_case_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/feedback"))
            .and(header("authorization", "Bearer abc"))
            .and(body_partial_json(serde_json::json!({
                "sessionId": "s1",
                "turnId": "t1",
                "versionIndex": 1,
                "evaluation": "GOOD",
                "comment": "helpful"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpFeedbackClient::new(
            &TransportConfig::new(TransportMode::Batch, server.uri()),
            Arc::new(StaticToken::new("abc")),
        )
        .unwrap();

        client.send(&feedback()).await.unwrap();
    }

    #[tokio::test]
    async fn submit_swallows_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/feedback"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = HttpFeedbackClient::new(
            &TransportConfig::new(TransportMode::Batch, server.uri()),
            Arc::new(StaticToken::anonymous()),
        )
        .unwrap();

        client.submit(feedback());

        for _ in 0..50 {
            if !server.received_requests().await.unwrap_or_default().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(client.send(&feedback()).await.is_err());
    }
}
