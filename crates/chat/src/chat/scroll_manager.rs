use crate::chat::transcript::Turn;

/// Distance from the top, in pixels, that triggers loading older history.
pub const DEFAULT_LOAD_OLDER_THRESHOLD: f32 = 48.;
/// Gap kept above the most recent user turn on first display.
pub const DEFAULT_INITIAL_TOP_MARGIN: f32 = 16.;

/// Scroll position with offsets measured from the top of the content.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub offset: f32,
    pub content_height: f32,
    pub viewport_height: f32,
}

impl ScrollMetrics {
    pub fn new(offset: f32, content_height: f32, viewport_height: f32) -> Self {
        Self {
            offset,
            content_height,
            viewport_height,
        }
    }

    pub fn max_offset(&self) -> f32 {
        (self.content_height - self.viewport_height).max(0.)
    }

    pub fn near_top(&self, threshold: f32) -> bool {
        self.offset <= threshold
    }

    pub fn clamp_offset(&self, offset: f32) -> f32 {
        offset.clamp(0., self.max_offset())
    }
}

/// Post-layout measurements handed back by the view.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayoutMetrics {
    pub metrics: ScrollMetrics,
    /// Top edge of the most recent user turn, if one is laid out.
    pub last_user_turn_top: Option<f32>,
}

/// Position captured before older content is inserted above the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    pub offset: f32,
    pub content_height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollCommand {
    SetOffset(f32),
}

/// Opaque server cursor pointing before the oldest fetched turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageCursor(pub String);

/// One batch of history, newest turn first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub turns: Vec<Turn>,
    pub next_cursor: Option<PageCursor>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub session_id: String,
    pub before: Option<PageCursor>,
}

/// Drives backward pagination and keeps the viewport steady across it.
#[derive(Debug, Clone)]
pub struct HistoryPager {
    session_id: Option<String>,
    cursor: Option<PageCursor>,
    has_more: bool,
    loading: bool,
    anchor: Option<ScrollAnchor>,
    anchor_ready: bool,
    pages_loaded: usize,
    initial_position_pending: bool,
    initial_position_done: bool,
    initial_top_margin: f32,
    load_older_threshold: f32,
}

impl HistoryPager {
    pub fn new(initial_top_margin: f32) -> Self {
        Self {
            session_id: None,
            cursor: None,
            has_more: true,
            loading: false,
            anchor: None,
            anchor_ready: false,
            pages_loaded: 0,
            initial_position_pending: false,
            initial_position_done: false,
            initial_top_margin,
            load_older_threshold: DEFAULT_LOAD_OLDER_THRESHOLD,
        }
    }

    pub fn with_load_older_threshold(mut self, threshold: f32) -> Self {
        self.load_older_threshold = threshold;
        self
    }

    pub fn load_older_threshold(&self) -> f32 {
        self.load_older_threshold
    }

    /// Whether the viewport is close enough to the top to fetch older turns.
    pub fn wants_older(&self, metrics: ScrollMetrics) -> bool {
        metrics.near_top(self.load_older_threshold)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Restarts pagination and first-display positioning for `session_id`.
    pub fn reset(&mut self, session_id: Option<String>) {
        *self = Self {
            session_id,
            ..Self::new(self.initial_top_margin).with_load_older_threshold(self.load_older_threshold)
        };
    }

    /// Marks a conversation created in this process as fully loaded: every
    /// turn it has is already live, so there is nothing older to fetch.
    pub fn mark_fully_loaded(&mut self) {
        self.has_more = false;
        self.initial_position_done = true;
    }

    /// Measure-before phase of a backward fetch.
    pub fn begin_load_older(&mut self, metrics: ScrollMetrics, trigger: bool) -> Option<PageRequest> {
        if self.loading || !self.has_more || !trigger {
            return None;
        }
        let session_id = self.session_id.clone()?;

        self.loading = true;
        self.anchor = Some(ScrollAnchor {
            offset: metrics.offset,
            content_height: metrics.content_height,
        });
        self.anchor_ready = false;

        Some(PageRequest {
            session_id,
            before: self.cursor.clone(),
        })
    }

    pub fn complete_load(&mut self, page: &Page) {
        self.loading = false;
        self.has_more = self.has_more && page.has_more;
        self.cursor = page.next_cursor.clone();
        self.pages_loaded += 1;

        if self.pages_loaded == 1 && !self.initial_position_done {
            // The first page positions the view from scratch.
            self.anchor = None;
            self.anchor_ready = false;
            self.initial_position_pending = true;
        } else {
            self.anchor_ready = self.anchor.is_some();
        }
    }

    pub fn fail_load(&mut self) {
        self.loading = false;
        self.anchor = None;
        self.anchor_ready = false;
    }

    /// Post-layout hook. Returns the correction the view must apply, if any.
    pub fn after_layout(&mut self, layout: LayoutMetrics) -> Option<ScrollCommand> {
        let metrics = layout.metrics;

        if self.anchor_ready
            && let Some(anchor) = self.anchor.take()
        {
            self.anchor_ready = false;
            let inserted = metrics.content_height - anchor.content_height;
            let offset = metrics.clamp_offset(anchor.offset + inserted);
            tracing::debug!(inserted, offset, "restoring scroll anchor after older page");
            return Some(ScrollCommand::SetOffset(offset));
        }

        if self.initial_position_pending && !self.initial_position_done {
            self.initial_position_pending = false;
            self.initial_position_done = true;

            let target = match layout.last_user_turn_top {
                Some(top) => top - self.initial_top_margin,
                None => metrics.max_offset(),
            };
            return Some(ScrollCommand::SetOffset(metrics.clamp_offset(target)));
        }

        None
    }
}

impl Default for HistoryPager {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_TOP_MARGIN)
    }
}
