use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use docchat_transport::{Completion, Evaluation, RequestId, SourceRef};
use snafu::OptionExt;
use uuid::Uuid;

use crate::error::{
    ChatResult, NoPendingTurnSnafu, StaleRequestSnafu, UnknownTurnSnafu, UnknownVersionSnafu,
};

/// Stable identifier for one turn.
///
/// Server-issued when the answer carries one, otherwise minted locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn new_v7() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// User evaluation attached to one answer version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Feedback {
    #[default]
    None,
    Rated {
        evaluation: Evaluation,
        reasons: Vec<String>,
        comment: Option<String>,
    },
}

impl Feedback {
    /// Builds a rating with blank reasons and comments dropped.
    pub fn rated(evaluation: Evaluation, reasons: Vec<String>, comment: Option<String>) -> Self {
        let reasons = reasons
            .into_iter()
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty())
            .collect();
        let comment = comment
            .map(|comment| comment.trim().to_string())
            .filter(|comment| !comment.is_empty());

        Self::Rated {
            evaluation,
            reasons,
            comment,
        }
    }

    pub fn evaluation(&self) -> Option<Evaluation> {
        match self {
            Self::None => None,
            Self::Rated { evaluation, .. } => Some(*evaluation),
        }
    }
}

/// One generated answer. Immutable once committed except for its feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerVersion {
    /// 1-based position within the turn.
    pub index: u32,
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub feedback: Feedback,
    pub created_at: DateTime<Utc>,
}

/// A user query and every answer generated for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub id: TurnId,
    pub query: String,
    pub created_at: DateTime<Utc>,
    /// Turn this one was edited from; used only for grouping.
    pub edited_from: Option<TurnId>,
    versions: Vec<AnswerVersion>,
}

impl Turn {
    pub fn new(id: TurnId, query: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            query: query.into(),
            created_at,
            edited_from: None,
            versions: Vec::new(),
        }
    }

    pub fn with_edited_from(mut self, edited_from: Option<TurnId>) -> Self {
        self.edited_from = edited_from;
        self
    }

    /// Appends the next version; used when hydrating fetched history.
    pub fn with_answer(
        mut self,
        text: impl Into<String>,
        sources: Vec<SourceRef>,
        created_at: DateTime<Utc>,
    ) -> Self {
        self.push_version(text.into(), sources, created_at);
        self
    }

    pub fn versions(&self) -> &[AnswerVersion] {
        &self.versions
    }

    pub fn version_count(&self) -> u32 {
        self.versions.len() as u32
    }

    pub fn version(&self, index: u32) -> Option<&AnswerVersion> {
        let position = index.checked_sub(1)?;
        self.versions.get(position as usize)
    }

    pub fn latest_version(&self) -> Option<&AnswerVersion> {
        self.versions.last()
    }

    fn version_mut(&mut self, index: u32) -> Option<&mut AnswerVersion> {
        let position = index.checked_sub(1)?;
        self.versions.get_mut(position as usize)
    }

    fn push_version(
        &mut self,
        text: String,
        sources: Vec<SourceRef>,
        created_at: DateTime<Utc>,
    ) -> u32 {
        let index = self.version_count() + 1;
        self.versions.push(AnswerVersion {
            index,
            text,
            sources,
            feedback: Feedback::None,
            created_at,
        });
        index
    }
}

/// Where a pending answer lands once committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingTarget {
    NewTurn { edited_from: Option<TurnId> },
    Redo(TurnId),
}

impl PendingTarget {
    pub fn new_turn() -> Self {
        Self::NewTurn { edited_from: None }
    }

    pub fn redo_turn_id(&self) -> Option<&TurnId> {
        match self {
            Self::Redo(turn_id) => Some(turn_id),
            Self::NewTurn { .. } => None,
        }
    }
}

/// Optimistic turn shown while a request is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub request_id: RequestId,
    pub query: String,
    pub created_at: DateTime<Utc>,
    /// Revealed answer text so far.
    pub buffer: String,
    pub target: PendingTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PendingState {
    #[default]
    Idle,
    Pending(PendingTurn),
    /// The pending turn was dropped; the transport for this request may
    /// still be shutting down.
    Discarding(RequestId),
}

impl PendingState {
    pub fn pending_turn(&self) -> Option<&PendingTurn> {
        match self {
            Self::Pending(pending) => Some(pending),
            Self::Idle | Self::Discarding(_) => None,
        }
    }

    /// Returns true when events for `request_id` may mutate the pending turn.
    pub fn accepts(&self, request_id: RequestId) -> bool {
        matches!(self, Self::Pending(pending) if pending.request_id == request_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub request_id: RequestId,
    pub turn_id: TurnId,
    pub version_index: u32,
    pub redo: bool,
}

/// Committed turns of one conversation plus the pending turn.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    // Fetched pages concatenated as received, newest first.
    fetched: Vec<Turn>,
    // Turns committed in this process, oldest first.
    live: Vec<Turn>,
    displayed: HashMap<TurnId, u32>,
    pending: PendingState,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &PendingState {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.fetched.len() + self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed turns, oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.fetched.iter().rev().chain(self.live.iter())
    }

    pub fn turn(&self, turn_id: &TurnId) -> Option<&Turn> {
        self.live
            .iter()
            .chain(self.fetched.iter())
            .find(|turn| &turn.id == turn_id)
    }

    fn turn_mut(&mut self, turn_id: &TurnId) -> Option<&mut Turn> {
        self.live
            .iter_mut()
            .chain(self.fetched.iter_mut())
            .find(|turn| &turn.id == turn_id)
    }

    /// Starts the pending turn for `request_id`.
    ///
    /// Returns false, changing nothing, while another turn is pending or when
    /// a redo targets an unknown turn.
    pub fn begin_pending(
        &mut self,
        request_id: RequestId,
        query: impl Into<String>,
        target: PendingTarget,
    ) -> bool {
        if matches!(self.pending, PendingState::Pending(_)) {
            return false;
        }

        if let PendingTarget::Redo(turn_id) = &target
            && self.turn(turn_id).is_none()
        {
            return false;
        }

        self.pending = PendingState::Pending(PendingTurn {
            request_id,
            query: query.into(),
            created_at: Utc::now(),
            buffer: String::new(),
            target,
        });
        true
    }

    pub fn append_delta(&mut self, request_id: RequestId, text: &str) -> bool {
        match &mut self.pending {
            PendingState::Pending(pending) if pending.request_id == request_id => {
                pending.buffer.push_str(text);
                true
            }
            _ => false,
        }
    }

    /// Turns the reveal buffer into an immutable answer version.
    pub fn commit(
        &mut self,
        request_id: RequestId,
        completion: Completion,
    ) -> ChatResult<CommitOutcome> {
        let pending = match std::mem::take(&mut self.pending) {
            PendingState::Pending(pending) if pending.request_id == request_id => pending,
            PendingState::Pending(pending) => {
                let expected = pending.request_id;
                self.pending = PendingState::Pending(pending);
                return StaleRequestSnafu {
                    stage: "commit-pending-turn",
                    expected,
                    received: request_id,
                }
                .fail();
            }
            other => {
                self.pending = other;
                return NoPendingTurnSnafu {
                    stage: "commit-pending-turn",
                    request_id,
                }
                .fail();
            }
        };

        let committed_at = Utc::now();
        match pending.target {
            PendingTarget::Redo(turn_id) => {
                let turn = self.turn_mut(&turn_id).context(UnknownTurnSnafu {
                    stage: "commit-redo-version",
                    turn_id: turn_id.clone(),
                })?;
                let version_index =
                    turn.push_version(pending.buffer, completion.sources, committed_at);
                self.displayed.insert(turn_id.clone(), version_index);

                Ok(CommitOutcome {
                    request_id,
                    turn_id,
                    version_index,
                    redo: true,
                })
            }
            PendingTarget::NewTurn { edited_from } => {
                let turn_id = completion
                    .turn_id
                    .map(TurnId::new)
                    .unwrap_or_else(TurnId::new_v7);
                let turn = Turn::new(turn_id.clone(), pending.query, pending.created_at)
                    .with_edited_from(edited_from)
                    .with_answer(pending.buffer, completion.sources, committed_at);
                self.live.push(turn);

                Ok(CommitOutcome {
                    request_id,
                    turn_id,
                    version_index: 1,
                    redo: false,
                })
            }
        }
    }

    /// Drops the pending turn. Committed turns are never touched.
    pub fn discard(&mut self, request_id: RequestId) -> bool {
        if !self.pending.accepts(request_id) {
            return false;
        }

        self.pending = PendingState::Discarding(request_id);
        true
    }

    pub fn settle(&mut self, request_id: RequestId) -> bool {
        if self.pending != PendingState::Discarding(request_id) {
            return false;
        }

        self.pending = PendingState::Idle;
        true
    }

    /// Returns false when the stored feedback already matches.
    pub fn set_feedback(
        &mut self,
        turn_id: &TurnId,
        version_index: u32,
        evaluation: Evaluation,
        reasons: Vec<String>,
        comment: Option<String>,
    ) -> ChatResult<bool> {
        let turn = self.turn_mut(turn_id).context(UnknownTurnSnafu {
            stage: "set-feedback",
            turn_id: turn_id.clone(),
        })?;
        let version = turn.version_mut(version_index).context(UnknownVersionSnafu {
            stage: "set-feedback",
            turn_id: turn_id.clone(),
            version_index,
        })?;

        let feedback = Feedback::rated(evaluation, reasons, comment);
        if version.feedback == feedback {
            return Ok(false);
        }

        version.feedback = feedback;
        Ok(true)
    }

    /// Adds one older page, given newest first. Turns already present are
    /// skipped. Returns how many were added.
    pub fn prepend_page(&mut self, turns: Vec<Turn>) -> usize {
        let before = self.fetched.len();
        for turn in turns {
            if self.turn(&turn.id).is_some() {
                continue;
            }
            self.fetched.push(turn);
        }
        self.fetched.len() - before
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Version shown for `turn_id`, defaulting to the newest.
    pub fn displayed_version(&self, turn_id: &TurnId) -> Option<u32> {
        let count = self.turn(turn_id)?.version_count();
        if count == 0 {
            return None;
        }

        let selected = self.displayed.get(turn_id).copied().unwrap_or(count);
        Some(selected.clamp(1, count))
    }

    pub fn select_previous_version(&mut self, turn_id: &TurnId) -> ChatResult<u32> {
        self.step_version(turn_id, false)
    }

    pub fn select_next_version(&mut self, turn_id: &TurnId) -> ChatResult<u32> {
        self.step_version(turn_id, true)
    }

    fn step_version(&mut self, turn_id: &TurnId, forward: bool) -> ChatResult<u32> {
        let current = self.displayed_version(turn_id).context(UnknownTurnSnafu {
            stage: "select-version",
            turn_id: turn_id.clone(),
        })?;
        let count = self
            .turn(turn_id)
            .map(Turn::version_count)
            .unwrap_or(current);

        let selected = if forward {
            (current + 1).min(count)
        } else {
            current.saturating_sub(1).max(1)
        };
        self.displayed.insert(turn_id.clone(), selected);
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;

    fn source(name: &str) -> SourceRef {
        SourceRef {
            document_id: format!("doc-{name}"),
            name: name.to_string(),
            snippet: None,
        }
    }

    fn completion(turn_id: Option<&str>) -> Completion {
        Completion {
            session_id: Some("s1".to_string()),
            turn_id: turn_id.map(str::to_string),
            sources: vec![source("guide.pdf")],
        }
    }

    fn committed(transcript: &mut Transcript, raw_request: u64, query: &str, answer: &str) -> TurnId {
        let request_id = RequestId::new(raw_request);
        assert!(transcript.begin_pending(request_id, query, PendingTarget::new_turn()));
        assert!(transcript.append_delta(request_id, answer));
        transcript
            .commit(request_id, completion(None))
            .unwrap()
            .turn_id
    }

    fn history_turn(id: &str, query: &str) -> Turn {
        Turn::new(TurnId::new(id), query, Utc::now()).with_answer(
            format!("answer to {query}"),
            Vec::new(),
            Utc::now(),
        )
    }

    #[test]
    fn deltas_accumulate_and_commit_as_first_version() {
        let mut transcript = Transcript::new();
        let request_id = RequestId::new(1);

        assert!(transcript.begin_pending(request_id, "Hello", PendingTarget::new_turn()));
        assert_eq!(transcript.pending().pending_turn().unwrap().query, "Hello");
        assert!(transcript.append_delta(request_id, "Hi"));
        assert!(transcript.append_delta(request_id, " there"));
        assert_eq!(transcript.pending().pending_turn().unwrap().buffer, "Hi there");

        let outcome = transcript.commit(request_id, completion(Some("t1"))).unwrap();
        assert_eq!(outcome.turn_id, TurnId::new("t1"));
        assert_eq!(outcome.version_index, 1);
        assert!(!outcome.redo);
        assert_eq!(transcript.pending(), &PendingState::Idle);

        let turn = transcript.turn(&TurnId::new("t1")).unwrap();
        assert_eq!(turn.query, "Hello");
        assert_eq!(turn.version_count(), 1);
        assert_eq!(turn.version(1).unwrap().text, "Hi there");
        assert_eq!(turn.version(1).unwrap().sources, vec![source("guide.pdf")]);
    }

    #[test]
    fn missing_server_turn_id_mints_one() {
        let mut transcript = Transcript::new();
        let turn_id = committed(&mut transcript, 1, "q", "a");

        assert!(Uuid::parse_str(turn_id.as_str()).is_ok());
    }

    #[test]
    fn stale_deltas_are_rejected() {
        let mut transcript = Transcript::new();
        assert!(transcript.begin_pending(RequestId::new(2), "q", PendingTarget::new_turn()));

        assert!(!transcript.append_delta(RequestId::new(1), "old"));
        assert_eq!(transcript.pending().pending_turn().unwrap().buffer, "");
    }

    #[test]
    fn second_pending_turn_is_refused() {
        let mut transcript = Transcript::new();
        assert!(transcript.begin_pending(RequestId::new(1), "first", PendingTarget::new_turn()));

        assert!(!transcript.begin_pending(RequestId::new(2), "second", PendingTarget::new_turn()));
        assert_eq!(transcript.pending().pending_turn().unwrap().query, "first");
    }

    #[test]
    fn redo_appends_a_version_and_keeps_older_ones() {
        let mut transcript = Transcript::new();
        let turn_id = committed(&mut transcript, 1, "Explain", "first answer");
        let original = transcript.turn(&turn_id).unwrap().version(1).unwrap().clone();

        let request_id = RequestId::new(2);
        assert!(transcript.begin_pending(request_id, "Explain", PendingTarget::Redo(turn_id.clone())));
        transcript.append_delta(request_id, "second answer");
        let outcome = transcript.commit(request_id, completion(None)).unwrap();

        assert!(outcome.redo);
        assert_eq!(outcome.turn_id, turn_id);
        assert_eq!(outcome.version_index, 2);
        assert_eq!(transcript.len(), 1);

        let turn = transcript.turn(&turn_id).unwrap();
        assert_eq!(turn.version_count(), 2);
        assert_eq!(turn.version(1), Some(&original));
        assert_eq!(turn.version(2).unwrap().text, "second answer");
        assert_eq!(transcript.displayed_version(&turn_id), Some(2));
    }

    #[test]
    fn redo_of_unknown_turn_is_refused() {
        let mut transcript = Transcript::new();

        assert!(!transcript.begin_pending(
            RequestId::new(1),
            "q",
            PendingTarget::Redo(TurnId::new("missing")),
        ));
        assert_eq!(transcript.pending(), &PendingState::Idle);
    }

    #[test]
    fn edit_creates_a_new_turn_and_keeps_the_original() {
        let mut transcript = Transcript::new();
        let original_id = committed(&mut transcript, 1, "Waht is Rust", "typo answer");
        let original = transcript.turn(&original_id).unwrap().clone();

        let request_id = RequestId::new(2);
        assert!(transcript.begin_pending(
            request_id,
            "What is Rust",
            PendingTarget::NewTurn {
                edited_from: Some(original_id.clone()),
            },
        ));
        transcript.append_delta(request_id, "A language");
        let outcome = transcript.commit(request_id, completion(Some("t2"))).unwrap();

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.turn(&original_id), Some(&original));
        let edited = transcript.turn(&outcome.turn_id).unwrap();
        assert_eq!(edited.edited_from, Some(original_id));
        assert_eq!(edited.query, "What is Rust");
    }

    #[test]
    fn discard_drops_only_the_pending_turn() {
        let mut transcript = Transcript::new();
        let kept = committed(&mut transcript, 1, "q1", "a1");

        let request_id = RequestId::new(2);
        transcript.begin_pending(request_id, "q2", PendingTarget::new_turn());
        transcript.append_delta(request_id, "partial");

        assert!(!transcript.discard(RequestId::new(9)));
        assert!(transcript.discard(request_id));
        assert_eq!(transcript.pending(), &PendingState::Discarding(request_id));
        assert!(!transcript.append_delta(request_id, "late"));
        assert!(matches!(
            transcript.commit(request_id, completion(None)),
            Err(ChatError::NoPendingTurn { .. })
        ));

        assert!(transcript.settle(request_id));
        assert_eq!(transcript.pending(), &PendingState::Idle);
        assert_eq!(transcript.len(), 1);
        assert!(transcript.turn(&kept).is_some());
    }

    #[test]
    fn pending_turn_can_start_while_discarding() {
        let mut transcript = Transcript::new();
        transcript.begin_pending(RequestId::new(1), "q1", PendingTarget::new_turn());
        transcript.discard(RequestId::new(1));

        assert!(transcript.begin_pending(RequestId::new(2), "q2", PendingTarget::new_turn()));
        assert!(!transcript.settle(RequestId::new(1)));
        assert!(transcript.pending().accepts(RequestId::new(2)));
    }

    #[test]
    fn commit_for_other_request_keeps_pending_turn() {
        let mut transcript = Transcript::new();
        transcript.begin_pending(RequestId::new(2), "q", PendingTarget::new_turn());

        let result = transcript.commit(RequestId::new(1), completion(None));
        assert!(matches!(
            result,
            Err(ChatError::StaleRequest { expected, received, .. })
                if expected == RequestId::new(2) && received == RequestId::new(1)
        ));
        assert!(transcript.pending().accepts(RequestId::new(2)));
    }

    #[test]
    fn feedback_reports_only_actual_changes() {
        let mut transcript = Transcript::new();
        let turn_id = committed(&mut transcript, 1, "q", "a");

        let changed = transcript
            .set_feedback(&turn_id, 1, Evaluation::Bad, vec!["wrong".to_string()], None)
            .unwrap();
        assert!(changed);

        let repeated = transcript
            .set_feedback(
                &turn_id,
                1,
                Evaluation::Bad,
                vec![" wrong ".to_string(), "  ".to_string()],
                Some(" ".to_string()),
            )
            .unwrap();
        assert!(!repeated);

        let flipped = transcript
            .set_feedback(&turn_id, 1, Evaluation::Good, Vec::new(), None)
            .unwrap();
        assert!(flipped);
        assert_eq!(
            transcript.turn(&turn_id).unwrap().version(1).unwrap().feedback.evaluation(),
            Some(Evaluation::Good)
        );
    }

    #[test]
    fn feedback_on_unknown_targets_fails() {
        let mut transcript = Transcript::new();
        let turn_id = committed(&mut transcript, 1, "q", "a");

        assert!(matches!(
            transcript.set_feedback(&turn_id, 2, Evaluation::Good, Vec::new(), None),
            Err(ChatError::UnknownVersion { version_index: 2, .. })
        ));
        assert!(matches!(
            transcript.set_feedback(&TurnId::new("nope"), 1, Evaluation::Good, Vec::new(), None),
            Err(ChatError::UnknownTurn { .. })
        ));
    }

    #[test]
    fn pages_display_oldest_first_before_live_turns() {
        let mut transcript = Transcript::new();
        let live = committed(&mut transcript, 1, "live", "a");

        // Each page arrives newest first; the second page is older.
        assert_eq!(
            transcript.prepend_page(vec![history_turn("t4", "four"), history_turn("t3", "three")]),
            2
        );
        assert_eq!(
            transcript.prepend_page(vec![history_turn("t2", "two"), history_turn("t1", "one")]),
            2
        );

        let order = transcript
            .turns()
            .map(|turn| turn.id.as_str().to_string())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["t1", "t2", "t3", "t4", live.as_str()]);
    }

    #[test]
    fn duplicate_page_turns_are_skipped() {
        let mut transcript = Transcript::new();
        transcript.prepend_page(vec![history_turn("t2", "two")]);

        assert_eq!(
            transcript.prepend_page(vec![history_turn("t2", "two"), history_turn("t1", "one")]),
            1
        );
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn version_navigation_is_bounded() {
        let mut transcript = Transcript::new();
        let turn_id = committed(&mut transcript, 1, "q", "v1");
        for raw in 2..=3 {
            let request_id = RequestId::new(raw);
            transcript.begin_pending(request_id, "q", PendingTarget::Redo(turn_id.clone()));
            transcript.append_delta(request_id, &format!("v{raw}"));
            transcript.commit(request_id, completion(None)).unwrap();
        }

        assert_eq!(transcript.displayed_version(&turn_id), Some(3));
        assert_eq!(transcript.select_next_version(&turn_id).unwrap(), 3);
        assert_eq!(transcript.select_previous_version(&turn_id).unwrap(), 2);
        assert_eq!(transcript.select_previous_version(&turn_id).unwrap(), 1);
        assert_eq!(transcript.select_previous_version(&turn_id).unwrap(), 1);
        assert_eq!(transcript.select_next_version(&turn_id).unwrap(), 2);
        assert!(transcript.select_next_version(&TurnId::new("nope")).is_err());
    }

    #[test]
    fn reset_clears_everything() {
        let mut transcript = Transcript::new();
        committed(&mut transcript, 1, "q", "a");
        transcript.begin_pending(RequestId::new(2), "q2", PendingTarget::new_turn());

        transcript.reset();
        assert!(transcript.is_empty());
        assert_eq!(transcript.pending(), &PendingState::Idle);
    }
}
