use std::sync::Arc;

use snafu::ResultExt;
use tokio::sync::{mpsc, oneshot};

use super::auth::TokenProvider;
use super::config::TransportConfig;
use super::error::{DecodeBatchSnafu, SendRequestSnafu, TransportResult};
use super::http::{authorize, build_client, ensure_success};
use super::protocol::{BatchResponse, TurnRequest};
use super::transport::{
    Completion, RequestId, TransportEvent, TransportEventPayload, TransportMode, TransportWorker,
    TurnStreamHandle, TurnTransport, make_event_stream,
};
use super::typing::{TypingOutcome, TypingSimulator};

/// One-shot transport whose answer is revealed by the typing simulator.
pub struct BatchTransport {
    client: reqwest::Client,
    config: TransportConfig,
    tokens: Arc<dyn TokenProvider>,
}

impl BatchTransport {
    pub fn new(config: TransportConfig, tokens: Arc<dyn TokenProvider>) -> TransportResult<Self> {
        let client = build_client(&config)?;
        Ok(Self {
            client,
            config,
            tokens,
        })
    }

    async fn fetch_answer(
        client: &reqwest::Client,
        config: &TransportConfig,
        tokens: &dyn TokenProvider,
        request: &TurnRequest,
    ) -> TransportResult<BatchResponse> {
        let url = config.batch_url();
        let builder = client
            .post(&url)
            .timeout(config.request_timeout)
            .json(request);

        let response = authorize(builder, tokens)
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "send-batch-request",
                url: url.clone(),
            })?;
        let response = ensure_success(response, "batch-http-status").await?;

        response.json::<BatchResponse>().await.context(DecodeBatchSnafu {
            stage: "decode-batch-response",
        })
    }

    async fn run_batch_worker(
        client: reqwest::Client,
        config: TransportConfig,
        tokens: Arc<dyn TokenProvider>,
        request: TurnRequest,
        request_id: RequestId,
        event_tx: mpsc::UnboundedSender<TransportEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let fetched = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(request_id = %request_id, "batch request cancelled");
                return;
            }
            fetched = Self::fetch_answer(&client, &config, tokens.as_ref(), &request) => fetched,
        };

        let response = match fetched {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(
                    request_id = %request_id,
                    error = %error,
                    "batch answer request failed"
                );
                let _ = event_tx.send(TransportEvent::new(
                    request_id,
                    TransportEventPayload::Failed(error.to_string()),
                ));
                return;
            }
        };

        let outcome = TypingSimulator::new(config.typing_interval)
            .run(
                &response.answer,
                response.answer_chunks.as_deref(),
                request_id,
                &event_tx,
                &mut cancel_rx,
            )
            .await;
        if outcome != TypingOutcome::Completed {
            return;
        }

        // Same tail as a terminal stream frame: session first, then completion.
        if request.session_id.as_deref() != Some(response.session_id.as_str()) {
            let _ = event_tx.send(TransportEvent::new(
                request_id,
                TransportEventPayload::SessionAssigned(response.session_id.clone()),
            ));
        }

        let _ = event_tx.send(TransportEvent::new(
            request_id,
            TransportEventPayload::Completed(Completion {
                session_id: Some(response.session_id),
                turn_id: response.turn_id,
                sources: response.sources,
            }),
        ));
    }
}

impl TurnTransport for BatchTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Batch
    }

    fn start_turn(
        &self,
        request: TurnRequest,
        request_id: RequestId,
    ) -> TransportResult<TurnStreamHandle> {
        let (event_tx, stream, cancel_rx) = make_event_stream(request_id);
        let worker: TransportWorker = Box::pin(Self::run_batch_worker(
            self.client.clone(),
            self.config.clone(),
            Arc::clone(&self.tokens),
            request,
            request_id,
            event_tx,
            cancel_rx,
        ));

        Ok(TurnStreamHandle { stream, worker })
    }
}
