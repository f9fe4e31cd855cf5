//! Cursor pagination over a conversation's history.
//!
//! The loader never performs I/O while holding state: it hands out a
//! [`PageRequest`] ticket, the caller fetches it wherever it likes, and the
//! result comes back through [`HistoryLoader::complete`]. That keeps every
//! state change on the caller's task and makes stale responses detectable.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, error, warn};

use crate::api::InboxApi;
use crate::errors::AppError;
use crate::models::{Message, MessagePage, PageCursor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageTarget {
    Newest,
    Older(PageCursor),
}

/// A ticket for one page fetch. Only the loader that issued it, with the same
/// generation, will accept the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub conversation_id: String,
    pub generation: u64,
    pub target: PageTarget,
}

impl PageRequest {
    pub fn is_initial(&self) -> bool {
        self.target == PageTarget::Newest
    }
}

/// Performs the network half of a ticket.
pub async fn fetch(api: &dyn InboxApi, request: &PageRequest) -> Result<MessagePage, AppError> {
    match &request.target {
        PageTarget::Newest => api.fetch_newest(&request.conversation_id).await,
        PageTarget::Older(cursor) => api.fetch_page(cursor).await,
    }
}

/// An accepted page, already in ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPage {
    pub messages: Vec<Message>,
    pub initial: bool,
}

#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(LoadedPage),
    /// The ticket belongs to a closed or reopened view; nothing changed.
    Stale,
    Failed { initial: bool, error: AppError },
}

#[derive(Debug)]
pub struct HistoryLoader {
    conversation_id: String,
    generation: u64,
    cursor: Option<PageCursor>,
    consumed: HashSet<PageCursor>,
    in_flight: bool,
    initial_done: bool,
}

impl HistoryLoader {
    pub fn new(conversation_id: impl Into<String>, generation: u64) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            generation,
            cursor: None,
            consumed: HashSet::new(),
            in_flight: false,
            initial_done: false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight
    }

    pub fn has_older(&self) -> bool {
        self.cursor.is_some()
    }

    fn ticket(&self, target: PageTarget) -> PageRequest {
        PageRequest {
            conversation_id: self.conversation_id.clone(),
            generation: self.generation,
            target,
        }
    }

    /// Ticket for the newest page. Issued once per loader.
    pub fn request_initial(&mut self) -> Option<PageRequest> {
        if self.initial_done || self.in_flight {
            return None;
        }
        self.in_flight = true;
        Some(self.ticket(PageTarget::Newest))
    }

    /// Ticket for the next older page, or `None` when there is nothing older
    /// or a load is already running.
    pub fn request_older(&mut self) -> Option<PageRequest> {
        if self.in_flight || !self.initial_done {
            return None;
        }
        let cursor = self.cursor.clone()?;
        self.in_flight = true;
        Some(self.ticket(PageTarget::Older(cursor)))
    }

    /// Applies the result of a ticket this loader issued.
    pub fn complete(&mut self, request: &PageRequest, result: Result<MessagePage, AppError>) -> LoadOutcome {
        if request.generation != self.generation || request.conversation_id != self.conversation_id {
            debug!(
                "Discarding stale page for {} (generation {} != {})",
                request.conversation_id, request.generation, self.generation
            );
            return LoadOutcome::Stale;
        }
        self.in_flight = false;
        let initial = request.is_initial();

        let page = match result {
            Ok(page) => page,
            Err(error) => {
                error!("Failed to fetch messages for {}: {error}", self.conversation_id);
                return LoadOutcome::Failed { initial, error };
            }
        };

        if let PageTarget::Older(used) = &request.target {
            self.consumed.insert(used.clone());
        }
        if initial {
            self.initial_done = true;
        }
        self.cursor = match page.next_cursor() {
            Some(next) if self.consumed.contains(&next) => {
                warn!("Backend repeated a consumed cursor for {}; treating history as complete", self.conversation_id);
                None
            }
            next => next,
        };

        LoadOutcome::Loaded(LoadedPage { messages: ascending(page.data), initial })
    }
}

/// Pages arrive newest-first.
fn ascending(mut messages: Vec<Message>) -> Vec<Message> {
    messages.reverse();
    // stable: equal timestamps keep their relative order
    messages.sort_by_key(|m| m.created_time);
    messages
}

/// Prepends an older ascending page to an ascending history, skipping ids that
/// are already present. Returns how many messages were added.
pub fn prepend_older(history: &mut VecDeque<Message>, seen: &mut HashSet<String>, older: Vec<Message>) -> usize {
    let fresh: Vec<Message> = older.into_iter().filter(|m| seen.insert(m.id.clone())).collect();
    let added = fresh.len();
    let out_of_order = match (fresh.last(), history.front()) {
        (Some(last), Some(first)) => last.created_time > first.created_time,
        _ => false,
    };
    for message in fresh.into_iter().rev() {
        history.push_front(message);
    }
    if out_of_order {
        warn!("Older page overlapped newer history; re-sorting");
        history.make_contiguous().sort_by_key(|m| m.created_time);
    }
    added
}
