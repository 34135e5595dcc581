#![deny(unsafe_code)]

//! Wire-level half of the chat client: frame decoding, the two answer
//! transports, the typing simulator and feedback submission.

use std::sync::Arc;

pub mod auth;
pub mod batch;
pub mod config;
pub mod error;
pub mod feedback;
/// Blank-line delimited frame decoding.
pub mod frame;
mod http;
pub mod protocol;
pub mod streaming;
pub mod transport;
pub mod typing;

pub use auth::{EnvToken, StaticToken, TokenProvider};
pub use batch::BatchTransport;
pub use config::TransportConfig;
pub use error::{TransportError, TransportResult};
pub use feedback::HttpFeedbackClient;
pub use frame::{Frame, FrameDecoder};
pub use protocol::{
    BatchResponse, Evaluation, FeedbackRequest, FramePayload, SourceRef, TurnRequest,
};
pub use streaming::SseTransport;
pub use transport::{
    BoxFuture, Completion, RequestId, TransportEvent, TransportEventPayload, TransportMode,
    TransportWorker, TurnEventStream, TurnStreamHandle, TurnTransport, make_event_stream,
};
pub use typing::{DEFAULT_TYPING_INTERVAL, TypingOutcome, TypingSimulator};

/// Builds the transport selected by `config.mode`.
pub fn create_transport(
    config: TransportConfig,
    tokens: Arc<dyn TokenProvider>,
) -> TransportResult<Arc<dyn TurnTransport>> {
    tracing::debug!(mode = ?config.mode, endpoint = %config.endpoint, "creating transport");
    match config.mode {
        TransportMode::Streaming => Ok(Arc::new(SseTransport::new(config, tokens)?)),
        TransportMode::Batch => Ok(Arc::new(BatchTransport::new(config, tokens)?)),
    }
}
