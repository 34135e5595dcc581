use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::ACCEPT;
use snafu::ResultExt;
use tokio::sync::{mpsc, oneshot};

use super::auth::TokenProvider;
use super::config::TransportConfig;
use super::error::{SendRequestSnafu, TransportError, TransportResult};
use super::frame::FrameDecoder;
use super::http::{authorize, build_client, ensure_success};
use super::protocol::{FramePayload, TurnRequest};
use super::transport::{
    Completion, RequestId, TransportEvent, TransportEventPayload, TransportMode, TransportWorker,
    TurnStreamHandle, TurnTransport, make_event_stream,
};

const DEFAULT_REMOTE_ERROR_MESSAGE: &str = "the server reported an error while answering";

/// Incremental transport reading blank-line delimited frames.
pub struct SseTransport {
    client: reqwest::Client,
    config: TransportConfig,
    tokens: Arc<dyn TokenProvider>,
}

impl SseTransport {
    pub fn new(config: TransportConfig, tokens: Arc<dyn TokenProvider>) -> TransportResult<Self> {
        let client = build_client(&config)?;
        Ok(Self {
            client,
            config,
            tokens,
        })
    }

    async fn open_stream(
        client: &reqwest::Client,
        url: &str,
        tokens: &dyn TokenProvider,
        request: &TurnRequest,
    ) -> TransportResult<reqwest::Response> {
        let builder = client
            .post(url)
            .header(ACCEPT, "text/event-stream")
            .json(request);

        let response = authorize(builder, tokens)
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "open-stream",
                url: url.to_string(),
            })?;

        ensure_success(response, "stream-http-status").await
    }

    fn emit_error_event(
        event_tx: &mpsc::UnboundedSender<TransportEvent>,
        request_id: RequestId,
        error: TransportError,
    ) {
        let _ = event_tx.send(TransportEvent::new(
            request_id,
            TransportEventPayload::Failed(error.to_string()),
        ));
    }

    /// Maps one decoded frame to events, in delta, session, terminal order.
    fn map_payload(
        payload: FramePayload,
        session_id: &mut Option<String>,
    ) -> Vec<TransportEventPayload> {
        if payload.error {
            let message = payload
                .message
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REMOTE_ERROR_MESSAGE.to_string());
            let error = TransportError::RemoteFailure {
                stage: "remote-error-frame",
                message,
            };
            return vec![TransportEventPayload::Failed(error.to_string())];
        }

        let mut events = Vec::new();

        if let Some(chunk) = payload.chunk
            && !chunk.is_empty()
        {
            events.push(TransportEventPayload::Delta(chunk));
        }

        if let Some(assigned) = payload.session_id
            && session_id.as_deref() != Some(assigned.as_str())
        {
            *session_id = Some(assigned.clone());
            events.push(TransportEventPayload::SessionAssigned(assigned));
        }

        if payload.done {
            events.push(TransportEventPayload::Completed(Completion {
                session_id: session_id.clone(),
                turn_id: payload.turn_id,
                sources: payload.sources,
            }));
        }

        events
    }

    async fn run_stream_worker(
        client: reqwest::Client,
        url: String,
        tokens: Arc<dyn TokenProvider>,
        request: TurnRequest,
        request_id: RequestId,
        event_tx: mpsc::UnboundedSender<TransportEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let opened = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(request_id = %request_id, "stream cancelled before response");
                return;
            }
            opened = Self::open_stream(&client, &url, tokens.as_ref(), &request) => opened,
        };

        let response = match opened {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(
                    request_id = %request_id,
                    url = %url,
                    error = %error,
                    "failed to open answer stream"
                );
                Self::emit_error_event(&event_tx, request_id, error);
                return;
            }
        };

        tracing::debug!(request_id = %request_id, "answer stream opened");

        let mut body = response.bytes_stream();
        let mut decoder = FrameDecoder::new();
        let mut session_id = request.session_id.clone();

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    // Dropping `body` on return releases the connection.
                    tracing::debug!(request_id = %request_id, "answer stream cancelled");
                    return;
                }
                next_chunk = body.next() => {
                    match next_chunk {
                        Some(Ok(bytes)) => {
                            for frame in decoder.feed(&bytes) {
                                let payload = match frame.decode() {
                                    Ok(payload) => payload,
                                    Err(error) => {
                                        tracing::warn!(
                                            request_id = %request_id,
                                            error = %error,
                                            "answer stream carried a malformed frame"
                                        );
                                        Self::emit_error_event(&event_tx, request_id, error);
                                        return;
                                    }
                                };

                                for payload in Self::map_payload(payload, &mut session_id) {
                                    let terminal = payload.is_terminal();
                                    if event_tx.send(TransportEvent::new(request_id, payload)).is_err() {
                                        return;
                                    }
                                    if terminal {
                                        return;
                                    }
                                }
                            }
                        }
                        Some(Err(source)) => {
                            tracing::warn!(
                                request_id = %request_id,
                                error = %source,
                                "answer stream read failed"
                            );
                            Self::emit_error_event(
                                &event_tx,
                                request_id,
                                TransportError::ReadStream {
                                    stage: "read-stream-chunk",
                                    source,
                                },
                            );
                            return;
                        }
                        None => {
                            let buffered = decoder.pending_len();
                            tracing::warn!(
                                request_id = %request_id,
                                buffered,
                                "answer stream closed without a terminal frame"
                            );
                            Self::emit_error_event(
                                &event_tx,
                                request_id,
                                TransportError::StreamIncomplete {
                                    stage: "read-stream-eof",
                                    buffered,
                                },
                            );
                            return;
                        }
                    }
                }
            }
        }
    }
}

impl TurnTransport for SseTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Streaming
    }

    fn start_turn(
        &self,
        request: TurnRequest,
        request_id: RequestId,
    ) -> TransportResult<TurnStreamHandle> {
        let (event_tx, stream, cancel_rx) = make_event_stream(request_id);
        let worker: TransportWorker = Box::pin(Self::run_stream_worker(
            self.client.clone(),
            self.config.stream_url(),
            Arc::clone(&self.tokens),
            request,
            request_id,
            event_tx,
            cancel_rx,
        ));

        Ok(TurnStreamHandle { stream, worker })
    }
}
