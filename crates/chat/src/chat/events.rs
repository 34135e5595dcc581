use docchat_transport::{Evaluation, RequestId};

use crate::chat::scroll_manager::ScrollMetrics;
use crate::chat::transcript::{CommitOutcome, TurnId};

/// User intents accepted by the session orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatIntent {
    Send {
        query: String,
    },
    Redo {
        turn_id: TurnId,
    },
    EditAndResend {
        turn_id: TurnId,
        query: String,
    },
    Stop,
    /// The view scrolled; older history loads once it nears the top.
    Scrolled {
        metrics: ScrollMetrics,
    },
    Feedback {
        turn_id: TurnId,
        version_index: u32,
        evaluation: Evaluation,
        reasons: Vec<String>,
        comment: Option<String>,
    },
    PreviousVersion {
        turn_id: TurnId,
    },
    NextVersion {
        turn_id: TurnId,
    },
}

impl ChatIntent {
    pub fn send(query: impl Into<String>) -> Self {
        Self::Send {
            query: query.into(),
        }
    }
}

/// Model change produced by applying one transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The pending turn's reveal buffer grew by `delta`.
    PendingUpdated {
        request_id: RequestId,
        delta: String,
    },
    /// The first successful round trip established the conversation id.
    /// Always followed by the matching `Committed`.
    SessionAssigned(String),
    Committed(CommitOutcome),
    Failed {
        request_id: RequestId,
        message: String,
    },
}

impl SessionEvent {
    /// Returns true for events that end the active request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed(_) | Self::Failed { .. })
    }
}
