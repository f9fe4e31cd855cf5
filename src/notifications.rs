//! Cross-conversation alerts raised from push notifications.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::models::{EventKind, LiveEvent, NotificationEvent};
use crate::push::{EventSource, Subscription};

/// What the operator is looking at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActiveView {
    /// The conversation list, or nothing in particular.
    #[default]
    Conversations,
    /// The detail view of the conversation with this counter-party.
    Conversation(String),
    /// Comments left by this user.
    Comments(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationTarget {
    Conversation(String),
    /// The comments of this user.
    Comments(String),
}

impl NavigationTarget {
    pub fn path(&self) -> String {
        match self {
            NavigationTarget::Conversation(id) => format!("/messages/{id}"),
            NavigationTarget::Comments(user_id) => format!("/comments/{user_id}"),
        }
    }

    /// The view that becomes active after navigating here.
    pub fn view(&self) -> ActiveView {
        match self {
            NavigationTarget::Conversation(id) => ActiveView::Conversation(id.clone()),
            NavigationTarget::Comments(user_id) => ActiveView::Comments(user_id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub target: NavigationTarget,
    /// The commented post, shown alongside the alert. Not a navigation target.
    pub post_id: Option<String>,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn post_path(&self) -> Option<String> {
        self.post_id.as_ref().map(|post| format!("/posts/{post}"))
    }
}

/// A new message is suppressed only while its own conversation is on screen.
/// Comments live in a different id space and always alert.
pub fn should_alert(event: &NotificationEvent, active: &ActiveView) -> bool {
    match (event, active) {
        (NotificationEvent::NewMessage(notice), ActiveView::Conversation(open)) => notice.sender_id != *open,
        (NotificationEvent::NewMessage(_), _) => true,
        (NotificationEvent::NewComment(_), _) => true,
    }
}

/// Holds the visible alerts. Expiry is driven from outside: whoever raised the
/// alert schedules [`NotificationRouter::expire`] after the configured ttl.
#[derive(Debug, Default)]
pub struct NotificationRouter {
    alerts: Vec<Alert>,
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to both notification kinds for the lifetime of the router,
    /// regardless of which conversation is open.
    pub fn register<F>(events: &dyn EventSource, forward: F) -> Self
    where
        F: Fn(LiveEvent) + Send + Sync + Clone + 'static,
    {
        let subscriptions = [EventKind::NotificationUserSentMessage, EventKind::NotificationUserSentComment]
            .into_iter()
            .map(|kind| {
                let forward = forward.clone();
                events.on(kind, Box::new(move |event: &LiveEvent| forward(event.clone())))
            })
            .collect();
        Self { subscriptions, ..Self::default() }
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    /// Raises an alert for the event unless the active view suppresses it.
    pub fn route(&mut self, event: &NotificationEvent, active: &ActiveView) -> Option<&Alert> {
        if !should_alert(event, active) {
            debug!("Suppressing alert; conversation already on screen");
            return None;
        }

        let (title, body, target, post_id) = match event {
            NotificationEvent::NewMessage(notice) => (
                format!("New Message from {}", notice.sender_id),
                notice.user_text.clone(),
                NavigationTarget::Conversation(notice.sender_id.clone()),
                None,
            ),
            NotificationEvent::NewComment(notice) => (
                format!("New Comment from {}", notice.user_id),
                notice.comment_text.clone(),
                NavigationTarget::Comments(notice.author().to_string()),
                notice.post_id.clone(),
            ),
        };

        self.next_id += 1;
        let alert = Alert { id: self.next_id, title, body, target, post_id, raised_at: Utc::now() };
        info!("Alert {}: {}", alert.id, alert.title);
        self.alerts.push(alert);
        self.alerts.last()
    }

    pub fn dismiss(&mut self, id: u64) -> Option<Alert> {
        let index = self.alerts.iter().position(|a| a.id == id)?;
        Some(self.alerts.remove(index))
    }

    /// The click action: dismisses the alert and returns where to go.
    pub fn navigate(&mut self, id: u64) -> Option<NavigationTarget> {
        self.dismiss(id).map(|alert| alert.target)
    }

    /// Timer-driven removal. Returns false if the alert was already gone.
    pub fn expire(&mut self, id: u64) -> bool {
        let expired = self.dismiss(id).is_some();
        if expired {
            debug!("Alert {id} expired");
        }
        expired
    }

    /// Drops the push subscriptions; alerts already raised stay until expiry.
    pub fn unregister(&mut self) {
        self.subscriptions.clear();
    }
}
