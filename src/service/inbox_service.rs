use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::InboxApi;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::{LiveEvent, MessagePage, PageUser, SendAck};
use crate::notifications::{ActiveView, Alert, NavigationTarget, NotificationRouter};
use crate::push::{ConnectionState, EventHub, EventSource, Subscription};
use crate::timeline::history::{self, PageRequest};
use crate::timeline::scroll::{self, ScrollIntent, Viewport};
use crate::timeline::{ConversationTimeline, LoadState, PageEffect};

pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// The view layer. It is also the viewport of whichever conversation is active.
pub trait View: Viewport + Send + 'static {
    fn render_timeline(&mut self, timeline: &ConversationTimeline);
    fn render_conversations(&mut self, users: &[PageUser]);
    fn show_alert(&mut self, alert: &Alert);
    fn dismiss_alert(&mut self, id: u64);
    fn show_alerts(&mut self, alerts: &[Alert]);
    fn show_connectivity(&mut self, state: ConnectionState);
    fn show_status(&mut self, status: &Status);
    fn show_error(&mut self, message: &str);
    fn navigate(&mut self, path: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub connection: ConnectionState,
    pub active: ActiveView,
    pub open: Vec<String>,
    pub alerts: usize,
    pub dead_letters: usize,
}

/// Everything that can wake the inbox loop.
#[derive(Debug)]
pub enum InboxEvent {
    Live(LiveEvent),
    Connectivity(ConnectionState),
    PageLoaded { request: PageRequest, result: Result<MessagePage, AppError> },
    ScrollSettled { conversation_id: String, generation: u64, intent: ScrollIntent },
    AlertExpired(u64),
    SendCompleted { conversation_id: String, result: Result<SendAck, AppError> },
    UsersLoaded(Result<Vec<PageUser>, AppError>),
}

impl InboxEvent {
    pub fn label(&self) -> &'static str {
        match self {
            InboxEvent::Live(_) => "live",
            InboxEvent::Connectivity(_) => "connectivity",
            InboxEvent::PageLoaded { .. } => "page-loaded",
            InboxEvent::ScrollSettled { .. } => "scroll-settled",
            InboxEvent::AlertExpired(_) => "alert-expired",
            InboxEvent::SendCompleted { .. } => "send-completed",
            InboxEvent::UsersLoaded(_) => "users-loaded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Users,
    Open(String),
    Close(Option<String>),
    Up(u32),
    Down(u32),
    Send(String),
    Edit(String),
    Draft(String),
    Save,
    Cancel,
    Delete(String),
    Alerts,
    Go(u64),
    Dismiss(u64),
    Status,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboxSettings {
    pub alert_ttl: Duration,
    pub scroll_settle: Duration,
}

impl Default for InboxSettings {
    fn default() -> Self {
        Self { alert_ttl: Duration::from_millis(5000), scroll_settle: Duration::from_millis(100) }
    }
}

impl From<&Config> for InboxSettings {
    fn from(config: &Config) -> Self {
        Self { alert_ttl: config.alert_ttl, scroll_settle: config.scroll_settle }
    }
}

/// Owns every piece of inbox state. All mutation happens on the task that
/// drives [`Inbox::run`]; network calls and timers are spawned and report
/// back through the event queue.
pub struct Inbox<V: View> {
    api: Arc<dyn InboxApi>,
    hub: EventHub,
    view: V,
    settings: InboxSettings,
    tx: mpsc::UnboundedSender<InboxEvent>,
    rx: mpsc::UnboundedReceiver<InboxEvent>,
    timelines: HashMap<String, ConversationTimeline>,
    active: ActiveView,
    router: NotificationRouter,
    users: Vec<PageUser>,
    next_generation: u64,
    _connectivity: Subscription,
}

impl<V: View> Inbox<V> {
    pub fn new(api: Arc<dyn InboxApi>, hub: EventHub, view: V, settings: InboxSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let live_tx = tx.clone();
        let router = NotificationRouter::register(&hub, move |event| {
            let _ = live_tx.send(InboxEvent::Live(event));
        });

        let state_tx = tx.clone();
        let connectivity = hub.on_connectivity(Box::new(move |state: ConnectionState| {
            let _ = state_tx.send(InboxEvent::Connectivity(state));
        }));

        Self {
            api,
            hub,
            view,
            settings,
            tx,
            rx,
            timelines: HashMap::new(),
            active: ActiveView::default(),
            router,
            users: Vec::new(),
            next_generation: 0,
            _connectivity: connectivity,
        }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn active(&self) -> &ActiveView {
        &self.active
    }

    pub fn timeline(&self, conversation_id: &str) -> Option<&ConversationTimeline> {
        self.timelines.get(conversation_id)
    }

    pub fn router(&self) -> &NotificationRouter {
        &self.router
    }

    fn active_conversation(&self) -> Option<&str> {
        match &self.active {
            ActiveView::Conversation(id) => Some(id),
            _ => None,
        }
    }

    fn is_active(&self, conversation_id: &str) -> bool {
        self.active_conversation() == Some(conversation_id)
    }

    // ── Spawned work ─────────────────────────────────────────────────────────

    fn spawn_fetch(&self, request: PageRequest) {
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = history::fetch(api.as_ref(), &request).await;
            let _ = tx.send(InboxEvent::PageLoaded { request, result });
        });
    }

    fn schedule_scroll(&self, conversation_id: &str, generation: u64, intent: ScrollIntent) {
        let tx = self.tx.clone();
        let delay = self.settings.scroll_settle;
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(InboxEvent::ScrollSettled { conversation_id, generation, intent });
        });
    }

    fn schedule_expiry(&self, alert_id: u64) {
        let tx = self.tx.clone();
        let ttl = self.settings.alert_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let _ = tx.send(InboxEvent::AlertExpired(alert_id));
        });
    }

    fn render_active(&mut self) {
        match &self.active {
            ActiveView::Conversation(id) => {
                if let Some(timeline) = self.timelines.get(id) {
                    self.view.render_timeline(timeline);
                }
            }
            ActiveView::Conversations => self.view.render_conversations(&self.users),
            ActiveView::Comments(_) => {}
        }
    }

    /// Renders the active conversation and pins it to the newest message once
    /// the render has settled.
    fn render_and_follow(&mut self, conversation_id: &str) {
        self.render_active();
        if let Some(timeline) = self.timelines.get(conversation_id) {
            self.schedule_scroll(conversation_id, timeline.generation(), ScrollIntent::Bottom);
        }
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Opens a conversation, or brings an already open one to the front. An
    /// open conversation whose first page failed is fetched again.
    pub fn open_conversation(&mut self, conversation_id: &str) {
        self.active = ActiveView::Conversation(conversation_id.to_string());

        if let Some(timeline) = self.timelines.get_mut(conversation_id) {
            let retry = match timeline.load_state() {
                LoadState::Failed(_) => timeline.retry_initial(),
                _ => None,
            };
            match retry {
                Some(request) => {
                    info!("Retrying first page of {conversation_id}");
                    self.spawn_fetch(request);
                    self.render_active();
                }
                None => self.render_and_follow(conversation_id),
            }
            return;
        }

        self.next_generation += 1;
        let tx = self.tx.clone();
        let (timeline, initial) =
            ConversationTimeline::open(conversation_id, self.next_generation, &self.hub, move |event| {
                let _ = tx.send(InboxEvent::Live(event));
            });
        self.timelines.insert(conversation_id.to_string(), timeline);
        if let Some(request) = initial {
            self.spawn_fetch(request);
        }
        self.render_active();
    }

    /// Closes the given conversation, or the active one. Pending fetches for
    /// it are left to finish and are discarded on arrival.
    pub fn close_conversation(&mut self, conversation_id: Option<&str>) -> Result<(), AppError> {
        let id = match conversation_id.or(self.active_conversation()) {
            Some(id) => id.to_string(),
            None => return Err(AppError::NoActiveConversation),
        };
        let Some(timeline) = self.timelines.remove(&id) else {
            return Err(AppError::NoActiveConversation);
        };
        timeline.close();
        if self.is_active(&id) {
            self.active = ActiveView::Conversations;
            self.render_active();
        }
        Ok(())
    }

    /// Re-evaluates the backward-load trigger for the active conversation.
    /// Safe to call on every scroll notification.
    pub fn on_scroll(&mut self) {
        let ActiveView::Conversation(id) = &self.active else {
            return;
        };
        let Some(timeline) = self.timelines.get_mut(id) else {
            return;
        };
        if let Some(request) = timeline.begin_older(&self.view) {
            debug!("Loading older messages for {}", request.conversation_id);
            self.spawn_fetch(request);
        }
    }

    pub fn scroll_up(&mut self, rows: u32) {
        let top = self.view.scroll_top().saturating_sub(rows);
        self.view.set_scroll_top(top);
        self.on_scroll();
    }

    pub fn scroll_down(&mut self, rows: u32) {
        let top = self.view.scroll_top().saturating_add(rows);
        self.view.set_scroll_top(top);
        self.on_scroll();
    }

    /// Sends a message to the active conversation. The sent message shows up
    /// through the push echo, not locally.
    pub fn send_message(&mut self, text: &str) -> Result<(), AppError> {
        let conversation_id = self
            .active_conversation()
            .ok_or(AppError::NoActiveConversation)?
            .to_string();

        // ── Validation ───────────────────────────────────────────────────────
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::EmptyField { field_name: "message".to_string() });
        }
        let length = text.chars().count();
        if length > MAX_MESSAGE_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "message".to_string(),
                max_length: MAX_MESSAGE_LENGTH,
                actual_length: length,
            });
        }

        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        let text = text.to_string();
        tokio::spawn(async move {
            let result = api.send_message(&conversation_id, &text).await;
            let _ = tx.send(InboxEvent::SendCompleted { conversation_id, result });
        });
        Ok(())
    }

    pub fn load_users(&self) {
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(InboxEvent::UsersLoaded(api.list_users().await));
        });
    }

    /// Follows an alert's navigation action; the alert is dismissed.
    pub fn follow_alert(&mut self, alert_id: u64) -> Result<(), AppError> {
        let target = self.router.navigate(alert_id).ok_or(AppError::UnknownAlert { id: alert_id })?;
        self.view.dismiss_alert(alert_id);
        self.view.navigate(&target.path());
        match target {
            NavigationTarget::Conversation(id) => self.open_conversation(&id),
            other => {
                self.active = other.view();
                self.render_active();
            }
        }
        Ok(())
    }

    pub fn dismiss_alert(&mut self, alert_id: u64) -> Result<(), AppError> {
        self.router.dismiss(alert_id).ok_or(AppError::UnknownAlert { id: alert_id })?;
        self.view.dismiss_alert(alert_id);
        Ok(())
    }

    fn active_timeline_mut(&mut self) -> Result<&mut ConversationTimeline, AppError> {
        let ActiveView::Conversation(id) = &self.active else {
            return Err(AppError::NoActiveConversation);
        };
        self.timelines.get_mut(id).ok_or(AppError::NoActiveConversation)
    }

    pub fn begin_edit(&mut self, message_id: &str) -> Result<(), AppError> {
        if !self.active_timeline_mut()?.begin_edit(message_id) {
            return Err(AppError::NotEditable { message_id: message_id.to_string() });
        }
        self.render_active();
        Ok(())
    }

    pub fn update_draft(&mut self, text: &str) -> Result<(), AppError> {
        if !self.active_timeline_mut()?.update_draft(text) {
            return Err(AppError::EmptyField { field_name: "draft".to_string() });
        }
        self.render_active();
        Ok(())
    }

    pub fn save_edit(&mut self) -> Result<(), AppError> {
        self.active_timeline_mut()?.save_edit();
        self.render_active();
        Ok(())
    }

    pub fn cancel_edit(&mut self) -> Result<(), AppError> {
        self.active_timeline_mut()?.cancel_edit();
        self.render_active();
        Ok(())
    }

    pub fn request_delete(&mut self, message_id: &str) -> Result<(), AppError> {
        if !self.active_timeline_mut()?.request_delete(message_id) {
            return Err(AppError::NotEditable { message_id: message_id.to_string() });
        }
        Ok(())
    }

    pub fn status(&self) -> Status {
        let mut open: Vec<String> = self.timelines.keys().cloned().collect();
        open.sort();
        Status {
            connection: self.hub.state(),
            active: self.active.clone(),
            open,
            alerts: self.router.alerts().len(),
            dead_letters: self.hub.dead_letters().len(),
        }
    }

    /// Runs one console command. `Quit` is handled by [`Inbox::run`].
    pub fn execute(&mut self, command: Command) -> Result<(), AppError> {
        match command {
            Command::Users => {
                self.active = ActiveView::Conversations;
                self.render_active();
                self.load_users();
            }
            Command::Open(id) => self.open_conversation(&id),
            Command::Close(id) => self.close_conversation(id.as_deref())?,
            Command::Up(rows) => self.scroll_up(rows),
            Command::Down(rows) => self.scroll_down(rows),
            Command::Send(text) => self.send_message(&text)?,
            Command::Edit(id) => self.begin_edit(&id)?,
            Command::Draft(text) => self.update_draft(&text)?,
            Command::Save => self.save_edit()?,
            Command::Cancel => self.cancel_edit()?,
            Command::Delete(id) => self.request_delete(&id)?,
            Command::Alerts => self.view.show_alerts(self.router.alerts()),
            Command::Go(id) => self.follow_alert(id)?,
            Command::Dismiss(id) => self.dismiss_alert(id)?,
            Command::Status => {
                let status = self.status();
                self.view.show_status(&status);
            }
            Command::Quit => {}
        }
        Ok(())
    }

    // ── Event handling ───────────────────────────────────────────────────────

    pub fn handle(&mut self, event: InboxEvent) {
        match event {
            InboxEvent::Live(event) => self.handle_live(event),
            InboxEvent::Connectivity(state) => {
                info!("Push channel {state:?}");
                self.view.show_connectivity(state);
            }
            InboxEvent::PageLoaded { request, result } => self.handle_page(request, result),
            InboxEvent::ScrollSettled { conversation_id, generation, intent } => {
                let current = self.timelines.get(&conversation_id).map(|t| t.generation());
                if self.is_active(&conversation_id) && current == Some(generation) {
                    scroll::apply(&mut self.view, intent);
                }
            }
            InboxEvent::AlertExpired(id) => {
                if self.router.expire(id) {
                    self.view.dismiss_alert(id);
                }
            }
            InboxEvent::SendCompleted { conversation_id, result } => match result {
                Ok(ack) => debug!("Message to {conversation_id} accepted ({:?})", ack.message_id),
                Err(e) if e.is_transport() => warn!("Failed to send message to {conversation_id}: {e}"),
                Err(e) => error!("Failed to send message to {conversation_id}: {e}"),
            },
            InboxEvent::UsersLoaded(result) => match result {
                Ok(users) => {
                    info!("Loaded {} conversations", users.len());
                    self.users = users;
                    if self.active == ActiveView::Conversations {
                        self.render_active();
                    }
                }
                Err(e) => {
                    if e.is_transport() {
                        warn!("Failed to load conversations: {e}");
                    } else {
                        error!("Failed to load conversations: {e}");
                    }
                    self.view.show_error(&format!("Could not load conversations: {e}"));
                }
            },
        }
    }

    fn handle_live(&mut self, event: LiveEvent) {
        match &event {
            LiveEvent::Conversation(message) => {
                let Some(id) = message.conversation_id().map(str::to_string) else {
                    let reason = format!("message {} names no sender", message.payload.data.message_id);
                    warn!("Dropping live '{}': {reason}", event.kind());
                    self.hub.dead_letter(event.kind().as_str(), reason);
                    return;
                };
                let Some(timeline) = self.timelines.get_mut(&id) else {
                    return;
                };
                if timeline.append(&event) && self.is_active(&id) {
                    self.render_and_follow(&id);
                }
            }
            LiveEvent::Notification(notice) => {
                if let Some(alert) = self.router.route(notice, &self.active) {
                    let id = alert.id;
                    self.view.show_alert(alert);
                    self.schedule_expiry(id);
                }
            }
        }
    }

    fn handle_page(&mut self, request: PageRequest, result: Result<MessagePage, AppError>) {
        let id = request.conversation_id.clone();
        let active = self.is_active(&id);
        let Some(timeline) = self.timelines.get_mut(&id) else {
            debug!("Discarding page for closed conversation {id}");
            return;
        };

        match timeline.apply_page(&request, result) {
            PageEffect::Stale | PageEffect::OlderFailed => {}
            PageEffect::Initial => {
                if active {
                    self.render_and_follow(&id);
                }
            }
            PageEffect::Prepended(added) => {
                let intent = timeline.release_anchor();
                debug!("Prepended {added} older messages to {id}");
                if active {
                    self.render_active();
                    scroll::apply(&mut self.view, intent);
                }
            }
            PageEffect::InitialFailed => {
                if active {
                    self.render_active();
                    self.view.show_error(&format!("Failed to load conversation {id}"));
                }
            }
        }
    }

    /// Waits for and handles one event.
    pub async fn step(&mut self) -> Option<&'static str> {
        let event = self.rx.recv().await?;
        let label = event.label();
        self.handle(event);
        Some(label)
    }

    /// Handles one event if one is already queued.
    pub fn try_step(&mut self) -> Option<&'static str> {
        let event = self.rx.try_recv().ok()?;
        let label = event.label();
        self.handle(event);
        Some(label)
    }

    /// Drives the inbox until `Quit` or the command stream ends.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.render_active();
        self.load_users();
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Quit) => break,
                    Some(command) => {
                        if let Err(e) = self.execute(command) {
                            warn!("Command failed: {e}");
                            self.view.show_error(&e.to_string());
                        }
                    }
                },
                Some(event) = self.rx.recv() => self.handle(event),
            }
        }

        for (_, timeline) in self.timelines.drain() {
            timeline.close();
        }
        self.router.unregister();
        info!("Inbox stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageCursor;
    use crate::push::RawEvent;
    use crate::timeline::history::tests::{message, page};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Newest pages hold `newest_size` messages ids prefixed with the call
    /// number; older pages hold three earlier messages and end the history.
    struct FakeApi {
        newest_size: u32,
        fail_first_newest: AtomicBool,
        newest_calls: AtomicUsize,
        older_calls: AtomicUsize,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl FakeApi {
        fn new(newest_size: u32) -> Arc<Self> {
            Arc::new(Self {
                newest_size,
                fail_first_newest: AtomicBool::new(false),
                newest_calls: AtomicUsize::new(0),
                older_calls: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl InboxApi for FakeApi {
        async fn fetch_newest(&self, conversation_id: &str) -> Result<MessagePage, AppError> {
            let call = self.newest_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_first_newest.swap(false, Ordering::SeqCst) {
                return Err(AppError::HttpStatus { url: format!("/messages/{conversation_id}"), status: 502 });
            }
            let messages = (0..self.newest_size)
                .rev()
                .map(|i| message(&format!("{call}-m{i}"), 10 + i, conversation_id))
                .collect();
            Ok(page(messages, Some("older")))
        }

        async fn fetch_page(&self, cursor: &PageCursor) -> Result<MessagePage, AppError> {
            assert_eq!(cursor.as_str(), "older");
            self.older_calls.fetch_add(1, Ordering::SeqCst);
            Ok(page(vec![message("o3", 3, "page"), message("o2", 2, "page"), message("o1", 1, "page")], None))
        }

        async fn send_message(&self, conversation_id: &str, text: &str) -> Result<SendAck, AppError> {
            self.sent.lock().unwrap().push((conversation_id.to_string(), text.to_string()));
            Ok(SendAck::default())
        }

        async fn list_users(&self) -> Result<Vec<PageUser>, AppError> {
            Ok(Vec::new())
        }
    }

    /// One row per timeline entry.
    struct RecordingView {
        rows: u32,
        top: u32,
        window: u32,
        rendered: Vec<Vec<String>>,
        alerts: Vec<Alert>,
        dismissed: Vec<u64>,
        errors: Vec<String>,
        paths: Vec<String>,
    }

    impl RecordingView {
        fn new(window: u32) -> Self {
            Self {
                rows: 0,
                top: 0,
                window,
                rendered: Vec::new(),
                alerts: Vec::new(),
                dismissed: Vec::new(),
                errors: Vec::new(),
                paths: Vec::new(),
            }
        }

        fn last_render(&self) -> Vec<&str> {
            self.rendered.last().map(|r| r.iter().map(String::as_str).collect()).unwrap_or_default()
        }
    }

    impl Viewport for RecordingView {
        fn scroll_height(&self) -> u32 {
            self.rows
        }
        fn scroll_top(&self) -> u32 {
            self.top
        }
        fn set_scroll_top(&mut self, offset: u32) {
            self.top = offset.min(self.rows.saturating_sub(self.window));
        }
        fn client_height(&self) -> u32 {
            self.window
        }
    }

    impl View for RecordingView {
        fn render_timeline(&mut self, timeline: &ConversationTimeline) {
            let ids: Vec<String> = timeline.entries().map(|e| e.id().to_string()).collect();
            self.rows = ids.len() as u32;
            self.rendered.push(ids);
        }
        fn render_conversations(&mut self, _users: &[PageUser]) {}
        fn show_alert(&mut self, alert: &Alert) {
            self.alerts.push(alert.clone());
        }
        fn dismiss_alert(&mut self, id: u64) {
            self.dismissed.push(id);
        }
        fn show_alerts(&mut self, _alerts: &[Alert]) {}
        fn show_connectivity(&mut self, _state: ConnectionState) {}
        fn show_status(&mut self, _status: &Status) {}
        fn show_error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }
        fn navigate(&mut self, path: &str) {
            self.paths.push(path.to_string());
        }
    }

    fn inbox(api: Arc<FakeApi>, hub: &EventHub) -> Inbox<RecordingView> {
        Inbox::new(api, hub.clone(), RecordingView::new(5), InboxSettings::default())
    }

    /// Lets spawned fetches and short timers finish, handling whatever they
    /// report, until the queue stays empty.
    async fn settle(inbox: &mut Inbox<RecordingView>) {
        loop {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let mut handled = 0;
            while inbox.try_step().is_some() {
                handled += 1;
            }
            if handled == 0 {
                break;
            }
        }
    }

    fn user_sent(conversation: &str, id: &str) -> RawEvent {
        RawEvent {
            name: "user-sent-message".into(),
            payload: json!({ "userText": "hi", "senderId": conversation,
                             "data": { "message_id": id, "recipient_id": "page" } }),
        }
    }

    fn notify(sender: &str) -> RawEvent {
        RawEvent {
            name: "notification-user-sent-message".into(),
            payload: json!({ "senderId": sender, "userText": "hi" }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn initial_page_renders_ascending_and_follows_the_bottom() {
        let hub = EventHub::new();
        let api = FakeApi::new(3);
        let mut inbox = inbox(api.clone(), &hub);

        inbox.open_conversation("C");
        settle(&mut inbox).await;

        assert_eq!(inbox.view().last_render(), ["1-m0", "1-m1", "1-m2"]);
        assert_eq!(inbox.view().top, 0, "three rows fit in a five row window");
        assert_eq!(api.newest_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_scroll_to_top_fetches_one_older_page_and_keeps_position() {
        let hub = EventHub::new();
        let api = FakeApi::new(20);
        let mut inbox = inbox(api.clone(), &hub);

        inbox.open_conversation("C");
        settle(&mut inbox).await;
        assert_eq!(inbox.view().top, 15);

        inbox.scroll_up(100);
        inbox.scroll_up(100);
        inbox.on_scroll();
        settle(&mut inbox).await;

        assert_eq!(api.older_calls.load(Ordering::SeqCst), 1);
        let render = inbox.view().last_render();
        assert_eq!(render.len(), 23);
        assert_eq!(&render[..4], ["o1", "o2", "o3", "1-m0"]);
        assert_eq!(inbox.view().top, 3, "offset moved by exactly the added height");

        inbox.scroll_up(100);
        settle(&mut inbox).await;
        assert_eq!(api.older_calls.load(Ordering::SeqCst), 1, "history is complete");
    }

    #[tokio::test(start_paused = true)]
    async fn message_for_a_background_conversation_alerts_and_appends() {
        let hub = EventHub::new();
        let mut inbox = inbox(FakeApi::new(2), &hub);

        inbox.open_conversation("C");
        inbox.open_conversation("D");
        settle(&mut inbox).await;
        let renders_before = inbox.view().rendered.len();

        hub.dispatch(user_sent("C", "live-1"));
        hub.dispatch(notify("C"));
        settle(&mut inbox).await;

        assert_eq!(inbox.view().alerts.len(), 1);
        assert_eq!(inbox.view().alerts[0].target, NavigationTarget::Conversation("C".into()));
        let c = inbox.timeline("C").unwrap();
        assert_eq!(c.live().len(), 1);
        assert_eq!(inbox.timeline("D").unwrap().live().len(), 0);
        assert_eq!(inbox.view().rendered.len(), renders_before, "D's view is untouched");
    }

    #[tokio::test(start_paused = true)]
    async fn message_for_the_active_conversation_is_not_alerted() {
        let hub = EventHub::new();
        let mut inbox = inbox(FakeApi::new(2), &hub);
        inbox.open_conversation("C");
        settle(&mut inbox).await;

        hub.dispatch(user_sent("C", "live-1"));
        hub.dispatch(notify("C"));
        settle(&mut inbox).await;

        assert!(inbox.view().alerts.is_empty());
        assert_eq!(inbox.view().last_render(), ["1-m0", "1-m1", "live-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reopening_after_a_failed_first_page_fetches_again() {
        let hub = EventHub::new();
        let api = FakeApi::new(2);
        api.fail_first_newest.store(true, Ordering::SeqCst);
        let mut inbox = inbox(api.clone(), &hub);

        inbox.open_conversation("C");
        settle(&mut inbox).await;
        let timeline = inbox.timeline("C").unwrap();
        assert!(matches!(timeline.load_state(), LoadState::Failed(_)));
        assert_eq!(timeline.entries().count(), 0);

        inbox.open_conversation("C");
        settle(&mut inbox).await;

        let timeline = inbox.timeline("C").unwrap();
        assert_eq!(timeline.load_state(), &LoadState::Ready);
        assert_eq!(inbox.view().last_render(), ["2-m0", "2-m1"]);
        assert_eq!(api.newest_calls.load(Ordering::SeqCst), 2);

        inbox.open_conversation("C");
        settle(&mut inbox).await;
        assert_eq!(api.newest_calls.load(Ordering::SeqCst), 2, "a loaded conversation is not fetched again");
    }

    #[tokio::test(start_paused = true)]
    async fn live_message_without_a_sender_is_dead_lettered() {
        let hub = EventHub::new();
        let mut inbox = inbox(FakeApi::new(2), &hub);
        inbox.open_conversation("C");
        settle(&mut inbox).await;
        let renders_before = inbox.view().rendered.len();

        hub.dispatch(RawEvent {
            name: "user-sent-message".into(),
            payload: json!({ "userText": "hi", "data": { "message_id": "orphan", "recipient_id": "page" } }),
        });
        settle(&mut inbox).await;

        assert_eq!(inbox.status().dead_letters, 1);
        let letter = hub.dead_letters().pop().unwrap();
        assert_eq!(letter.name, "user-sent-message");
        assert!(letter.reason.contains("orphan"));
        assert_eq!(inbox.view().rendered.len(), renders_before);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_or_oversized_sends_never_reach_the_network() {
        let hub = EventHub::new();
        let api = FakeApi::new(1);
        let mut inbox = inbox(api.clone(), &hub);

        assert!(matches!(inbox.send_message("hello"), Err(AppError::NoActiveConversation)));

        inbox.open_conversation("C");
        settle(&mut inbox).await;
        assert!(matches!(inbox.send_message("   \n\t"), Err(AppError::EmptyField { .. })));
        let long = "x".repeat(MAX_MESSAGE_LENGTH + 1);
        assert!(matches!(inbox.send_message(&long), Err(AppError::FieldTooLong { .. })));
        settle(&mut inbox).await;
        assert!(api.sent.lock().unwrap().is_empty());

        inbox.send_message("  hello  ").unwrap();
        settle(&mut inbox).await;
        assert_eq!(*api.sent.lock().unwrap(), [("C".to_string(), "hello".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn responses_for_closed_or_reopened_conversations_are_discarded() {
        let hub = EventHub::new();
        let api = FakeApi::new(2);
        let mut inbox = inbox(api.clone(), &hub);

        inbox.open_conversation("C");
        inbox.close_conversation(None).unwrap();
        inbox.open_conversation("C");
        settle(&mut inbox).await;

        assert_eq!(api.newest_calls.load(Ordering::SeqCst), 2);
        assert_eq!(inbox.view().last_render(), ["2-m0", "2-m1"]);
        assert_eq!(inbox.timeline("C").unwrap().history_len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn alerts_expire_and_can_be_followed() {
        let hub = EventHub::new();
        let mut inbox = inbox(FakeApi::new(1), &hub);

        hub.dispatch(notify("C"));
        hub.dispatch(notify("E"));
        settle(&mut inbox).await;
        let first = inbox.view().alerts[0].id;
        let second = inbox.view().alerts[1].id;

        inbox.follow_alert(first).unwrap();
        assert_eq!(inbox.view().paths, ["/messages/C"]);
        assert_eq!(inbox.active(), &ActiveView::Conversation("C".into()));
        assert!(matches!(inbox.follow_alert(first), Err(AppError::UnknownAlert { .. })));

        tokio::time::sleep(Duration::from_millis(5000)).await;
        settle(&mut inbox).await;
        assert!(inbox.router().alerts().is_empty());
        assert_eq!(inbox.view().dismissed, [first, second]);
    }

    #[tokio::test(start_paused = true)]
    async fn only_page_messages_accept_edits() {
        let hub = EventHub::new();
        let mut inbox = inbox(FakeApi::new(1), &hub);
        inbox.open_conversation("C");
        settle(&mut inbox).await;

        assert!(matches!(inbox.begin_edit("1-m0"), Err(AppError::NotEditable { .. })));
        hub.dispatch(RawEvent {
            name: "page-sent-message".into(),
            payload: json!({ "userText": "mine", "data": { "message_id": "p1", "recipient_id": "C" } }),
        });
        settle(&mut inbox).await;

        inbox.begin_edit("p1").unwrap();
        inbox.update_draft("changed").unwrap();
        inbox.save_edit().unwrap();
        assert!(inbox.timeline("C").unwrap().editing().is_none());
        inbox.request_delete("p1").unwrap();
    }
}
