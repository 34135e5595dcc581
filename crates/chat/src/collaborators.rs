//! Seams to the rest of the portal: caching, history, notifications and
//! feedback delivery.

use docchat_transport::{BoxFuture, FeedbackRequest, HttpFeedbackClient, TransportResult};

use crate::chat::scroll_manager::{Page, PageCursor};

/// Cache of fetched conversations owned by the host application.
pub trait ConversationCache: Send + Sync {
    fn invalidate_session_list(&self);

    fn invalidate_session(&self, session_id: &str);
}

/// Fetches history pages, newest first, ending before `before`.
pub trait PageSource: Send + Sync {
    fn fetch_page<'a>(
        &'a self,
        session_id: &'a str,
        before: Option<&'a PageCursor>,
    ) -> BoxFuture<'a, TransportResult<Page>>;
}

/// Surfaces user-visible error messages.
pub trait Notifier: Send + Sync {
    fn notify_error(&self, message: &str);
}

/// Delivers answer evaluations. Must not block.
pub trait FeedbackSink: Send + Sync {
    fn submit(&self, feedback: FeedbackRequest);
}

impl FeedbackSink for HttpFeedbackClient {
    fn submit(&self, feedback: FeedbackRequest) {
        HttpFeedbackClient::submit(self, feedback);
    }
}

/// Notifier for headless use that writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify_error(&self, message: &str) {
        tracing::error!(message, "chat request failed");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl ConversationCache for NoopCache {
    fn invalidate_session_list(&self) {}

    fn invalidate_session(&self, _session_id: &str) {}
}
