use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::transport::{RequestId, TransportEvent, TransportEventPayload};

/// Reveal cadence used when no interval is configured.
pub const DEFAULT_TYPING_INTERVAL: Duration = Duration::from_millis(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingOutcome {
    Completed,
    Cancelled,
    Disconnected,
}

/// Replays a complete answer as timed `Delta` events.
#[derive(Debug, Clone, Copy)]
pub struct TypingSimulator {
    interval: Duration,
}

impl Default for TypingSimulator {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_INTERVAL)
    }
}

impl TypingSimulator {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Emits one delta per chunk, each after one interval.
    ///
    /// Without explicit chunks the whole answer is a single chunk. Nothing is
    /// sent once `cancel_rx` fires, and the terminal event is left to the
    /// caller.
    pub async fn run(
        &self,
        answer: &str,
        chunks: Option<&[String]>,
        request_id: RequestId,
        event_tx: &mpsc::UnboundedSender<TransportEvent>,
        cancel_rx: &mut oneshot::Receiver<()>,
    ) -> TypingOutcome {
        let chunks: Vec<&str> = match chunks {
            Some(chunks) if !chunks.is_empty() => chunks.iter().map(String::as_str).collect(),
            _ => vec![answer],
        };

        for chunk in chunks.into_iter().filter(|chunk| !chunk.is_empty()) {
            tokio::select! {
                _ = &mut *cancel_rx => {
                    tracing::debug!(request_id = %request_id, "typing simulation cancelled");
                    return TypingOutcome::Cancelled;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            let event =
                TransportEvent::new(request_id, TransportEventPayload::Delta(chunk.to_string()));
            if event_tx.send(event).is_err() {
                return TypingOutcome::Disconnected;
            }
        }

        TypingOutcome::Completed
    }
}
