use chrono::{DateTime, Utc};
use docchat_transport::{RequestId, SourceRef};

use crate::chat::scroll_manager::HistoryPager;
use crate::chat::transcript::{Feedback, PendingState, Transcript, Turn, TurnId};

/// Read-only snapshot the view renders from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderModel {
    pub session_id: Option<String>,
    /// Committed turns, oldest first.
    pub turns: Vec<TurnView>,
    pub pending: Option<PendingView>,
    pub streaming: bool,
    pub loading_older: bool,
    pub has_more_history: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnView {
    pub turn_id: TurnId,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub edited_from: Option<TurnId>,
    pub displayed_version: u32,
    pub version_count: u32,
    pub can_show_previous: bool,
    pub can_show_next: bool,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub feedback: Feedback,
    /// A redo of this turn is in flight.
    pub regenerating: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingView {
    pub request_id: RequestId,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub buffer: String,
    pub redo_of: Option<TurnId>,
}

impl RenderModel {
    pub fn build(transcript: &Transcript, pager: &HistoryPager, session_id: Option<&str>) -> Self {
        let pending = transcript.pending().pending_turn();
        let redo_target = pending.and_then(|pending| pending.target.redo_turn_id());

        let turns = transcript
            .turns()
            .filter_map(|turn| {
                let displayed = transcript.displayed_version(&turn.id)?;
                Some(Self::turn_view(
                    turn,
                    displayed,
                    redo_target == Some(&turn.id),
                ))
            })
            .collect();

        Self {
            session_id: session_id.map(str::to_string),
            turns,
            pending: pending.map(|pending| PendingView {
                request_id: pending.request_id,
                query: pending.query.clone(),
                created_at: pending.created_at,
                buffer: pending.buffer.clone(),
                redo_of: pending.target.redo_turn_id().cloned(),
            }),
            streaming: matches!(transcript.pending(), PendingState::Pending(_)),
            loading_older: pager.is_loading(),
            has_more_history: pager.has_more(),
        }
    }

    fn turn_view(turn: &Turn, displayed: u32, regenerating: bool) -> TurnView {
        let version_count = turn.version_count();
        let (answer, sources, feedback) = turn
            .version(displayed)
            .map(|version| {
                (
                    version.text.clone(),
                    version.sources.clone(),
                    version.feedback.clone(),
                )
            })
            .unwrap_or_default();

        TurnView {
            turn_id: turn.id.clone(),
            query: turn.query.clone(),
            created_at: turn.created_at,
            edited_from: turn.edited_from.clone(),
            displayed_version: displayed,
            version_count,
            can_show_previous: displayed > 1,
            can_show_next: displayed < version_count,
            answer,
            sources,
            feedback,
            regenerating,
        }
    }

    pub fn turn(&self, turn_id: &TurnId) -> Option<&TurnView> {
        self.turns.iter().find(|turn| &turn.turn_id == turn_id)
    }
}
