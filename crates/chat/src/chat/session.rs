use std::sync::Arc;

use chrono::Utc;
use docchat_transport::{
    Completion, Evaluation, FeedbackRequest, RequestId, TransportEventPayload, TurnEventStream,
    TurnRequest, TurnTransport,
};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::task::JoinHandle;

use crate::chat::events::{ChatIntent, SessionEvent};
use crate::chat::render::RenderModel;
use crate::chat::scroll_manager::{HistoryPager, LayoutMetrics, ScrollCommand, ScrollMetrics};
use crate::chat::transcript::{Feedback, PendingTarget, Transcript, TurnId};
use crate::collaborators::{
    ConversationCache, FeedbackSink, NoopCache, Notifier, PageSource, TracingNotifier,
};
use crate::error::{
    ChatResult, EmptyQuerySnafu, FetchPageSnafu, NoRuntimeSnafu, StartTransportSnafu,
    TurnInFlightSnafu, UnknownTurnSnafu,
};

const STREAM_CLOSED_MESSAGE: &str = "answer stream ended before a terminal event";

struct ActiveRequest {
    request_id: RequestId,
    stream: TurnEventStream,
    worker: JoinHandle<()>,
    // Held until the round trip succeeds.
    assigned_session: Option<String>,
}

/// A discarded request whose worker has not finished yet.
struct ReleasingRequest {
    request_id: RequestId,
    worker: JoinHandle<()>,
}

/// Orchestrates one conversation: intents in, model transitions out.
///
/// At most one request is in flight. Every new send, redo or stop cancels
/// the previous request before anything else happens, and its events can
/// no longer reach the transcript.
pub struct ChatSession {
    transport: Arc<dyn TurnTransport>,
    cache: Arc<dyn ConversationCache>,
    notifier: Arc<dyn Notifier>,
    pages: Option<Arc<dyn PageSource>>,
    feedback: Option<Arc<dyn FeedbackSink>>,
    transcript: Transcript,
    pager: HistoryPager,
    session_id: Option<String>,
    active: Option<ActiveRequest>,
    releasing: Option<ReleasingRequest>,
    deferred: Option<SessionEvent>,
    next_request_id: u64,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn TurnTransport>) -> Self {
        Self {
            transport,
            cache: Arc::new(NoopCache),
            notifier: Arc::new(TracingNotifier),
            pages: None,
            feedback: None,
            transcript: Transcript::new(),
            pager: HistoryPager::default(),
            session_id: None,
            active: None,
            releasing: None,
            deferred: None,
            next_request_id: 1,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ConversationCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_page_source(mut self, pages: Arc<dyn PageSource>) -> Self {
        self.pages = Some(pages);
        self
    }

    pub fn with_feedback_sink(mut self, feedback: Arc<dyn FeedbackSink>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn with_initial_top_margin(mut self, margin: f32) -> Self {
        self.pager = HistoryPager::new(margin)
            .with_load_older_threshold(self.pager.load_older_threshold());
        self
    }

    pub fn with_load_older_threshold(mut self, threshold: f32) -> Self {
        self.pager = self.pager.with_load_older_threshold(threshold);
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn pager(&self) -> &HistoryPager {
        &self.pager
    }

    pub fn active_request(&self) -> Option<RequestId> {
        self.active.as_ref().map(|active| active.request_id)
    }

    pub fn send(&mut self, query: &str) -> ChatResult<RequestId> {
        let query = normalized_query(query, "validate-send-query")?;
        self.start_request(query, PendingTarget::new_turn())
    }

    /// Regenerates the answer of a committed turn as a new version.
    pub fn redo(&mut self, turn_id: &TurnId) -> ChatResult<RequestId> {
        let query = self
            .transcript
            .turn(turn_id)
            .map(|turn| turn.query.clone())
            .context(UnknownTurnSnafu {
                stage: "redo-turn",
                turn_id: turn_id.clone(),
            })?;

        self.start_request(query, PendingTarget::Redo(turn_id.clone()))
    }

    /// Sends a revised query as a new turn. The original turn is untouched.
    pub fn edit_and_resend(&mut self, turn_id: &TurnId, query: &str) -> ChatResult<RequestId> {
        ensure!(
            self.transcript.turn(turn_id).is_some(),
            UnknownTurnSnafu {
                stage: "edit-turn",
                turn_id: turn_id.clone(),
            }
        );
        let query = normalized_query(query, "validate-edited-query")?;

        self.start_request(
            query,
            PendingTarget::NewTurn {
                edited_from: Some(turn_id.clone()),
            },
        )
    }

    /// Cancels the in-flight request, if any. Never reported as a failure.
    ///
    /// The pending turn stays `Discarding` until the transport worker is
    /// released, which the next call to [`ChatSession::next_event`] awaits.
    pub fn stop(&mut self) -> bool {
        self.cancel_active("stopped")
    }

    /// Applies the next event of the active request.
    ///
    /// Returns `None` when nothing is in flight.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if let Some(event) = self.deferred.take() {
            return Some(event);
        }

        loop {
            if self.active.is_none() {
                self.settle_released().await;
                return None;
            }
            let active = self.active.as_mut()?;
            let request_id = active.request_id;

            let Some(event) = active.stream.recv().await else {
                let failed = self.fail_active(request_id, STREAM_CLOSED_MESSAGE.to_string());
                self.settle_released().await;
                return Some(failed);
            };

            if event.request_id != request_id {
                tracing::warn!(
                    expected = %request_id,
                    received = %event.request_id,
                    "dropping event from a superseded request"
                );
                continue;
            }

            if let Some(session_event) = self.apply_payload(request_id, event.payload) {
                if session_event.is_terminal() {
                    self.settle_released().await;
                }
                return Some(session_event);
            }
        }
    }

    /// Pumps events until the active request commits or fails.
    pub async fn drive(&mut self) -> Option<SessionEvent> {
        while let Some(event) = self.next_event().await {
            if event.is_terminal() {
                return Some(event);
            }
        }
        None
    }

    /// Fetches one older page when the pager allows it.
    ///
    /// Returns true when a page was merged; the view must then report its
    /// new layout through [`ChatSession::after_layout`].
    pub async fn load_older(&mut self, metrics: ScrollMetrics, trigger: bool) -> ChatResult<bool> {
        let Some(pages) = self.pages.clone() else {
            return Ok(false);
        };
        let Some(request) = self.pager.begin_load_older(metrics, trigger) else {
            return Ok(false);
        };

        let fetched = pages
            .fetch_page(&request.session_id, request.before.as_ref())
            .await;
        let page = match fetched {
            Ok(page) => page,
            Err(error) => {
                self.pager.fail_load();
                tracing::warn!(
                    session_id = %request.session_id,
                    error = %error,
                    "failed to load older history"
                );
                return Err(error).context(FetchPageSnafu {
                    stage: "fetch-history-page",
                    session_id: request.session_id,
                });
            }
        };

        self.pager.complete_load(&page);
        let added = self.transcript.prepend_page(page.turns);
        tracing::debug!(
            session_id = %request.session_id,
            added,
            has_more = self.pager.has_more(),
            "merged older history page"
        );
        Ok(true)
    }

    /// Loads older history when `metrics` is within the configured
    /// distance of the top.
    pub async fn scrolled(&mut self, metrics: ScrollMetrics) -> ChatResult<bool> {
        let trigger = self.pager.wants_older(metrics);
        self.load_older(metrics, trigger).await
    }

    pub fn after_layout(&mut self, layout: LayoutMetrics) -> Option<ScrollCommand> {
        self.pager.after_layout(layout)
    }

    /// Switches to an existing conversation; its history loads through
    /// [`ChatSession::load_older`].
    pub fn open_session(&mut self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        self.cancel_active("session-switch");
        self.transcript.reset();
        self.pager.reset(Some(session_id.clone()));
        self.session_id = Some(session_id);
    }

    pub fn start_new_conversation(&mut self) {
        self.cancel_active("new-conversation");
        self.transcript.reset();
        self.pager.reset(None);
        self.session_id = None;
    }

    /// Records an evaluation and submits it once per actual change.
    pub fn set_feedback(
        &mut self,
        turn_id: &TurnId,
        version_index: u32,
        evaluation: Evaluation,
        reasons: Vec<String>,
        comment: Option<String>,
    ) -> ChatResult<bool> {
        let changed =
            self.transcript
                .set_feedback(turn_id, version_index, evaluation, reasons, comment)?;
        if !changed {
            return Ok(false);
        }

        let (Some(session_id), Some(sink)) = (&self.session_id, &self.feedback) else {
            return Ok(true);
        };

        let stored = self
            .transcript
            .turn(turn_id)
            .and_then(|turn| turn.version(version_index))
            .map(|version| version.feedback.clone());
        if let Some(Feedback::Rated {
            evaluation,
            reasons,
            comment,
        }) = stored
        {
            sink.submit(FeedbackRequest {
                session_id: session_id.clone(),
                turn_id: turn_id.to_string(),
                version_index,
                timestamp: Utc::now(),
                evaluation,
                reasons,
                comment,
            });
        }

        Ok(true)
    }

    pub fn previous_version(&mut self, turn_id: &TurnId) -> ChatResult<u32> {
        self.transcript.select_previous_version(turn_id)
    }

    pub fn next_version(&mut self, turn_id: &TurnId) -> ChatResult<u32> {
        self.transcript.select_next_version(turn_id)
    }

    pub fn render_model(&self) -> RenderModel {
        RenderModel::build(&self.transcript, &self.pager, self.session_id.as_deref())
    }

    /// Routes one UI intent to the matching operation.
    pub async fn dispatch(&mut self, intent: ChatIntent) -> ChatResult<()> {
        match intent {
            ChatIntent::Send { query } => {
                self.send(&query)?;
            }
            ChatIntent::Redo { turn_id } => {
                self.redo(&turn_id)?;
            }
            ChatIntent::EditAndResend { turn_id, query } => {
                self.edit_and_resend(&turn_id, &query)?;
            }
            ChatIntent::Stop => {
                self.stop();
            }
            ChatIntent::Scrolled { metrics } => {
                self.scrolled(metrics).await?;
            }
            ChatIntent::Feedback {
                turn_id,
                version_index,
                evaluation,
                reasons,
                comment,
            } => {
                self.set_feedback(&turn_id, version_index, evaluation, reasons, comment)?;
            }
            ChatIntent::PreviousVersion { turn_id } => {
                self.previous_version(&turn_id)?;
            }
            ChatIntent::NextVersion { turn_id } => {
                self.next_version(&turn_id)?;
            }
        }
        Ok(())
    }

    fn start_request(&mut self, query: String, target: PendingTarget) -> ChatResult<RequestId> {
        let runtime = tokio::runtime::Handle::try_current().context(NoRuntimeSnafu {
            stage: "spawn-transport-worker",
        })?;

        self.cancel_active("superseded");

        let request_id = self.allocate_request_id();
        let mut request = TurnRequest::new(query.clone()).with_session_id(self.session_id.clone());
        if let Some(turn_id) = target.redo_turn_id() {
            request = request.with_redo_turn_id(turn_id.as_str());
        }

        let handle = self
            .transport
            .start_turn(request, request_id)
            .context(StartTransportSnafu {
                stage: "start-transport-turn",
            })?;

        if !self.transcript.begin_pending(request_id, query, target) {
            return TurnInFlightSnafu {
                stage: "begin-pending-turn",
            }
            .fail();
        }

        let worker = runtime.spawn(handle.worker);
        tracing::debug!(
            request_id = %request_id,
            mode = ?self.transport.mode(),
            session_id = ?self.session_id,
            "chat request started"
        );

        self.active = Some(ActiveRequest {
            request_id,
            stream: handle.stream,
            worker,
            assigned_session: None,
        });
        Ok(request_id)
    }

    fn cancel_active(&mut self, reason: &'static str) -> bool {
        // A commit report still queued belongs to a finished request.
        self.deferred = None;
        let Some(mut active) = self.active.take() else {
            return false;
        };

        // Cancelling drains queued events, so nothing from this request can
        // be applied afterwards.
        active.stream.cancel();
        self.release(active.request_id, active.worker);

        tracing::debug!(request_id = %active.request_id, reason, "chat request cancelled");
        true
    }

    fn apply_payload(
        &mut self,
        request_id: RequestId,
        payload: TransportEventPayload,
    ) -> Option<SessionEvent> {
        match payload {
            TransportEventPayload::Delta(delta) => {
                if !self.transcript.append_delta(request_id, &delta) {
                    tracing::warn!(request_id = %request_id, "dropping delta without a pending turn");
                    return None;
                }
                Some(SessionEvent::PendingUpdated { request_id, delta })
            }
            TransportEventPayload::SessionAssigned(session_id) => {
                if let Some(active) = self.active.as_mut() {
                    active.assigned_session = Some(session_id);
                }
                None
            }
            TransportEventPayload::Completed(completion) => {
                let active = self.active.take()?;
                Some(self.complete_active(active, completion))
            }
            TransportEventPayload::Failed(message) => Some(self.fail_active(request_id, message)),
        }
    }

    fn assign_session(&mut self, session_id: String) -> bool {
        if let Some(current) = &self.session_id {
            if current != &session_id {
                tracing::warn!(
                    current = %current,
                    assigned = %session_id,
                    "ignoring a different session id for an established conversation"
                );
            }
            return false;
        }

        tracing::info!(session_id = %session_id, "conversation established");
        self.pager.reset(Some(session_id.clone()));
        self.pager.mark_fully_loaded();
        self.session_id = Some(session_id);
        self.cache.invalidate_session_list();
        true
    }

    /// Commits the answer, then applies the session id the round trip
    /// returned. A newly established id is reported before the commit.
    fn complete_active(&mut self, active: ActiveRequest, completion: Completion) -> SessionEvent {
        let ActiveRequest {
            request_id,
            worker,
            assigned_session,
            ..
        } = active;
        let returned_session = completion.session_id.clone().or(assigned_session);

        let outcome = match self.transcript.commit(request_id, completion) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(request_id = %request_id, error = %error, "failed to commit answer");
                let message = error.to_string();
                self.notifier.notify_error(&message);
                self.release(request_id, worker);
                return SessionEvent::Failed {
                    request_id,
                    message,
                };
            }
        };

        let established = returned_session
            .filter(|session_id| self.assign_session(session_id.clone()));
        if let Some(session_id) = &self.session_id {
            self.cache.invalidate_session(session_id);
        }
        tracing::debug!(
            request_id = %request_id,
            turn_id = %outcome.turn_id,
            version_index = outcome.version_index,
            "answer committed"
        );

        match established {
            Some(session_id) => {
                self.deferred = Some(SessionEvent::Committed(outcome));
                SessionEvent::SessionAssigned(session_id)
            }
            None => SessionEvent::Committed(outcome),
        }
    }

    fn fail_active(&mut self, request_id: RequestId, message: String) -> SessionEvent {
        tracing::error!(request_id = %request_id, error = %message, "chat request failed");
        self.notifier.notify_error(&message);
        if let Some(active) = self.active.take() {
            self.release(active.request_id, active.worker);
        }

        SessionEvent::Failed {
            request_id,
            message,
        }
    }

    /// Discards the pending turn and aborts its worker. The transcript stays
    /// `Discarding` until [`ChatSession::settle_released`] sees the worker end.
    fn release(&mut self, request_id: RequestId, worker: JoinHandle<()>) {
        worker.abort();
        self.transcript.discard(request_id);
        self.releasing = Some(ReleasingRequest { request_id, worker });
    }

    async fn settle_released(&mut self) {
        let Some(releasing) = self.releasing.take() else {
            return;
        };

        if let Err(error) = releasing.worker.await
            && !error.is_cancelled()
        {
            tracing::warn!(
                request_id = %releasing.request_id,
                error = %error,
                "transport worker ended abnormally"
            );
        }
        self.transcript.settle(releasing.request_id);
        tracing::debug!(request_id = %releasing.request_id, "transport worker released");
    }

    fn allocate_request_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id = self.next_request_id.saturating_add(1);
        id
    }
}

fn normalized_query(query: &str, stage: &'static str) -> ChatResult<String> {
    let query = query.trim();
    ensure!(!query.is_empty(), EmptyQuerySnafu { stage });
    Ok(query.to_string())
}
