//! Keeps the viewport steady while older history is prepended, and pinned to
//! the newest message when the conversation grows at the bottom.

/// A scrollable area measured in whatever unit the view lays out in.
pub trait Viewport {
    /// Total height of the scrollable content.
    fn scroll_height(&self) -> u32;

    /// Offset of the first visible row from the top of the content.
    fn scroll_top(&self) -> u32;

    fn set_scroll_top(&mut self, offset: u32);

    /// Height of the visible window.
    fn client_height(&self) -> u32;
}

/// What to do once the view has laid out new content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollIntent {
    /// Show the newest message.
    Bottom,
    /// Keep what was visible before a prepend where it was. Carries the
    /// content height captured before the load.
    Restore { previous_height: u32 },
}

#[derive(Debug, Default)]
pub struct ScrollAnchor {
    captured: Option<u32>,
}

impl ScrollAnchor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backward load is due when the viewport sits at the top edge, nothing
    /// is loading, and an older page exists.
    pub fn wants_older(viewport: &dyn Viewport, loading: bool, has_older: bool) -> bool {
        viewport.scroll_top() == 0 && !loading && has_older
    }

    /// Records the content height right before a backward load.
    pub fn capture(&mut self, viewport: &dyn Viewport) {
        self.captured = Some(viewport.scroll_height());
    }

    /// Intent to apply once the prepended page is laid out. Falls back to
    /// `Bottom` when nothing was captured.
    pub fn release(&mut self) -> ScrollIntent {
        match self.captured.take() {
            Some(previous_height) => ScrollIntent::Restore { previous_height },
            None => ScrollIntent::Bottom,
        }
    }

    /// Drops a capture whose load failed.
    pub fn forget(&mut self) {
        self.captured = None;
    }
}

/// Applies an intent against a laid-out viewport.
pub fn apply(viewport: &mut dyn Viewport, intent: ScrollIntent) {
    match intent {
        ScrollIntent::Bottom => {
            let bottom = viewport.scroll_height().saturating_sub(viewport.client_height());
            viewport.set_scroll_top(bottom);
        }
        ScrollIntent::Restore { previous_height } => {
            let delta = viewport.scroll_height().saturating_sub(previous_height);
            let offset = viewport.scroll_top().saturating_add(delta);
            viewport.set_scroll_top(offset);
        }
    }
}
