use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use super::error::TransportResult;
use super::protocol::{SourceRef, TurnRequest};

/// Client-local identifier for one transport call.
///
/// A new id is minted for every send/redo so events from a superseded call
/// can be told apart from the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "req-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Streaming,
    Batch,
}

/// Terminal success details shared by both modes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub session_id: Option<String>,
    pub turn_id: Option<String>,
    pub sources: Vec<SourceRef>,
}

/// Mode-independent event vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventPayload {
    Delta(String),
    SessionAssigned(String),
    Completed(Completion),
    Failed(String),
}

impl TransportEventPayload {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub request_id: RequestId,
    pub payload: TransportEventPayload,
}

impl TransportEvent {
    pub fn new(request_id: RequestId, payload: TransportEventPayload) -> Self {
        Self {
            request_id,
            payload,
        }
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type TransportWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Receiving side of one call; doubles as its cancellation token.
///
/// Dropping the stream cancels the call.
pub struct TurnEventStream {
    request_id: RequestId,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct TurnStreamHandle {
    pub stream: TurnEventStream,
    pub worker: TransportWorker,
}

impl TurnEventStream {
    pub(crate) fn new(
        request_id: RequestId,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            request_id,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Signals the worker to stop and discards anything already queued.
    pub fn cancel(&mut self) -> bool {
        self.events.close();
        while self.events.try_recv().is_ok() {}
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for TurnEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// One narrow seam over both wire modes.
pub trait TurnTransport: Send + Sync {
    fn mode(&self) -> TransportMode;

    /// Prepares a call for `request`. The returned worker must be spawned
    /// for any event to be produced.
    fn start_turn(
        &self,
        request: TurnRequest,
        request_id: RequestId,
    ) -> TransportResult<TurnStreamHandle>;
}

pub fn make_event_stream(
    request_id: RequestId,
) -> (
    mpsc::UnboundedSender<TransportEvent>,
    TurnEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        TurnEventStream::new(request_id, event_rx, cancel_tx),
        cancel_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_signals_worker_and_drains_queue() {
        let (event_tx, mut stream, mut cancel_rx) = make_event_stream(RequestId::new(3));
        event_tx
            .send(TransportEvent::new(
                RequestId::new(3),
                TransportEventPayload::Delta("late".to_string()),
            ))
            .unwrap();

        assert!(stream.cancel());
        assert!(cancel_rx.try_recv().is_ok());
        assert!(stream.recv().await.is_none());
        assert!(event_tx.send(TransportEvent::new(
            RequestId::new(3),
            TransportEventPayload::Delta("after".to_string()),
        ))
        .is_err());
        assert!(!stream.cancel());
    }

    #[tokio::test]
    async fn dropping_stream_signals_cancellation() {
        let (_event_tx, stream, mut cancel_rx) = make_event_stream(RequestId::new(1));
        drop(stream);
        assert!(cancel_rx.try_recv().is_ok());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(TransportEventPayload::Completed(Completion::default()).is_terminal());
        assert!(TransportEventPayload::Failed("x".to_string()).is_terminal());
        assert!(!TransportEventPayload::Delta("x".to_string()).is_terminal());
        assert!(!TransportEventPayload::SessionAssigned("s".to_string()).is_terminal());
    }
}
