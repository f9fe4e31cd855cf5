pub mod history;
pub mod scroll;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::errors::AppError;
use crate::models::{ConversationEvent, EventKind, LiveEvent, Message, MessageOrigin, MessagePage};
use crate::push::{EventSource, Subscription};

use history::{HistoryLoader, LoadOutcome, PageRequest};
use scroll::{ScrollAnchor, ScrollIntent, Viewport};

/// A message delivered over the push channel. It has no server timestamp, so
/// it is stamped on arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveMessage {
    pub message_id: String,
    pub text: String,
    pub origin: MessageOrigin,
    pub arrived_at: DateTime<Utc>,
}

impl LiveMessage {
    fn from_event(event: &ConversationEvent) -> Self {
        Self {
            message_id: event.payload.data.message_id.clone(),
            text: event.payload.user_text.clone(),
            origin: event.origin,
            arrived_at: Utc::now(),
        }
    }
}

/// One row of the rendered conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineEntry<'a> {
    History(&'a Message),
    Live(&'a LiveMessage),
}

impl TimelineEntry<'_> {
    pub fn id(&self) -> &str {
        match self {
            TimelineEntry::History(m) => &m.id,
            TimelineEntry::Live(m) => &m.message_id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            TimelineEntry::History(m) => &m.text,
            TimelineEntry::Live(m) => &m.text,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TimelineEntry::History(m) => m.created_time,
            TimelineEntry::Live(m) => m.arrived_at,
        }
    }

    /// Whether the page (the operator) wrote this entry.
    pub fn sent_by_page(&self, counterparty_id: &str) -> bool {
        match self {
            TimelineEntry::History(m) => !m.is_from(counterparty_id),
            TimelineEntry::Live(m) => m.origin == MessageOrigin::OperatorSent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
    /// The first page failed; the view shows a blocking error.
    Failed(String),
}

/// Local, unsaved edit of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditDraft {
    pub message_id: String,
    pub text: String,
}

/// What a completed page fetch did to the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEffect {
    Stale,
    Initial,
    Prepended(usize),
    InitialFailed,
    OlderFailed,
}

/// In-memory state of one open conversation: ascending history followed by
/// live arrivals.
pub struct ConversationTimeline {
    conversation_id: String,
    history: VecDeque<Message>,
    seen: HashSet<String>,
    live: Vec<LiveMessage>,
    live_ids: HashSet<String>,
    loader: HistoryLoader,
    anchor: ScrollAnchor,
    load_state: LoadState,
    editing: Option<EditDraft>,
    subscriptions: Vec<Subscription>,
}

impl ConversationTimeline {
    /// Opens a conversation: subscribes to its message events and returns the
    /// ticket for the initial page. `forward` receives every matching event.
    pub fn open<F>(
        conversation_id: impl Into<String>,
        generation: u64,
        events: &dyn EventSource,
        forward: F,
    ) -> (Self, Option<PageRequest>)
    where
        F: Fn(LiveEvent) + Send + Sync + 'static,
    {
        let conversation_id = conversation_id.into();
        let forward = Arc::new(forward);
        let subscriptions = [EventKind::PageSentMessage, EventKind::UserSentMessage]
            .into_iter()
            .map(|kind| {
                let forward = Arc::clone(&forward);
                let id = conversation_id.clone();
                events.on(
                    kind,
                    Box::new(move |event: &LiveEvent| {
                        if let LiveEvent::Conversation(ev) = event {
                            if ev.conversation_id() == Some(id.as_str()) {
                                forward(event.clone());
                            }
                        }
                    }),
                )
            })
            .collect();

        let mut loader = HistoryLoader::new(conversation_id.clone(), generation);
        let initial = loader.request_initial();
        info!("Opened conversation {conversation_id} (generation {generation})");

        let timeline = Self {
            conversation_id,
            history: VecDeque::new(),
            seen: HashSet::new(),
            live: Vec::new(),
            live_ids: HashSet::new(),
            loader,
            anchor: ScrollAnchor::new(),
            load_state: LoadState::Loading,
            editing: None,
            subscriptions,
        };
        (timeline, initial)
    }

    /// Unsubscribes from the push channel. In-flight fetches are not aborted;
    /// their results will no longer find this timeline.
    pub fn close(mut self) {
        self.subscriptions.clear();
        info!("Closed conversation {}", self.conversation_id);
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn generation(&self) -> u64 {
        self.loader.generation()
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_loading()
    }

    pub fn has_older(&self) -> bool {
        self.loader.has_older()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn live(&self) -> &[LiveMessage] {
        &self.live
    }

    /// History in ascending order, then live arrivals in arrival order. A live
    /// entry whose id has since shown up in history is hidden, history being
    /// the authoritative copy.
    pub fn entries(&self) -> impl Iterator<Item = TimelineEntry<'_>> {
        let seen = &self.seen;
        self.history.iter().map(TimelineEntry::History).chain(
            self.live
                .iter()
                .filter(move |m| !seen.contains(&m.message_id))
                .map(TimelineEntry::Live),
        )
    }

    /// Appends a live message if it belongs here and is not already shown.
    pub fn append(&mut self, event: &LiveEvent) -> bool {
        let LiveEvent::Conversation(ev) = event else {
            return false;
        };
        if ev.conversation_id() != Some(self.conversation_id.as_str()) {
            return false;
        }
        let message_id = &ev.payload.data.message_id;
        if self.seen.contains(message_id) || !self.live_ids.insert(message_id.clone()) {
            debug!("Live message {message_id} already shown in {}", self.conversation_id);
            return false;
        }
        self.live.push(LiveMessage::from_event(ev));
        true
    }

    /// Starts a backward load if the viewport is at the top edge and one is
    /// due. Captures the scroll anchor first.
    pub fn begin_older(&mut self, viewport: &dyn Viewport) -> Option<PageRequest> {
        if !ScrollAnchor::wants_older(viewport, self.loader.is_loading(), self.loader.has_older()) {
            return None;
        }
        self.anchor.capture(viewport);
        let request = self.loader.request_older();
        if request.is_none() {
            self.anchor.forget();
        }
        request
    }

    /// Retries a failed first page.
    pub fn retry_initial(&mut self) -> Option<PageRequest> {
        let request = self.loader.request_initial()?;
        self.load_state = LoadState::Loading;
        Some(request)
    }

    /// Applies the result of a page fetch issued for this timeline.
    pub fn apply_page(&mut self, request: &PageRequest, result: Result<MessagePage, AppError>) -> PageEffect {
        match self.loader.complete(request, result) {
            LoadOutcome::Stale => PageEffect::Stale,
            LoadOutcome::Loaded(page) if page.initial => {
                for message in page.messages {
                    if self.seen.insert(message.id.clone()) {
                        self.history.push_back(message);
                    }
                }
                self.load_state = LoadState::Ready;
                PageEffect::Initial
            }
            LoadOutcome::Loaded(page) => {
                let added = history::prepend_older(&mut self.history, &mut self.seen, page.messages);
                PageEffect::Prepended(added)
            }
            LoadOutcome::Failed { initial: true, error } => {
                self.load_state = LoadState::Failed(error.to_string());
                PageEffect::InitialFailed
            }
            LoadOutcome::Failed { initial: false, .. } => {
                self.anchor.forget();
                PageEffect::OlderFailed
            }
        }
    }

    /// Scroll intent after a prepend has been laid out.
    pub fn release_anchor(&mut self) -> ScrollIntent {
        self.anchor.release()
    }

    // ── Local edit affordances ───────────────────────────────────────────────

    pub fn editing(&self) -> Option<&EditDraft> {
        self.editing.as_ref()
    }

    /// Starts editing a message the page sent. Counter-party messages cannot
    /// be edited.
    pub fn begin_edit(&mut self, message_id: &str) -> bool {
        let text = self
            .entries()
            .find(|e| e.id() == message_id && e.sent_by_page(&self.conversation_id))
            .map(|e| e.text().to_string());
        match text {
            Some(text) => {
                self.editing = Some(EditDraft { message_id: message_id.to_string(), text });
                true
            }
            None => false,
        }
    }

    pub fn update_draft(&mut self, text: impl Into<String>) -> bool {
        match self.editing.as_mut() {
            Some(draft) => {
                draft.text = text.into();
                true
            }
            None => false,
        }
    }

    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    /// Ends editing and hands back the draft. Persisting it is up to the caller.
    pub fn save_edit(&mut self) -> Option<EditDraft> {
        let draft = self.editing.take()?;
        info!("Edit of {} kept locally ({} chars)", draft.message_id, draft.text.chars().count());
        Some(draft)
    }

    /// Delete is an affordance only; nothing is removed locally or remotely.
    pub fn request_delete(&self, message_id: &str) -> bool {
        let known = self
            .entries()
            .any(|e| e.id() == message_id && e.sent_by_page(&self.conversation_id));
        if known {
            info!("Delete requested for {message_id} in {}", self.conversation_id);
        }
        known
    }
}
