/// Intents in and model events out of the orchestrator.
pub mod events;
pub mod render;
pub mod scroll_manager;
pub mod session;
/// Turns, answer versions and the pending turn.
pub mod transcript;

pub use events::{ChatIntent, SessionEvent};
pub use render::{PendingView, RenderModel, TurnView};
pub use scroll_manager::{
    DEFAULT_INITIAL_TOP_MARGIN, DEFAULT_LOAD_OLDER_THRESHOLD, HistoryPager, LayoutMetrics, Page,
    PageCursor, PageRequest, ScrollAnchor, ScrollCommand, ScrollMetrics,
};
pub use session::ChatSession;
pub use transcript::{
    AnswerVersion, CommitOutcome, Feedback, PendingState, PendingTarget, PendingTurn, Transcript,
    Turn, TurnId,
};
