//! The push channel: one auto-reconnecting socket per session, fanned out to
//! typed subscribers.
//!
//! Events are only delivered while connected. Nothing is buffered across a
//! disconnect; an event the server emits during an outage is lost.

pub mod frame;
pub mod transport;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{EventKind, LiveEvent};

pub use transport::{Connector, PushConnection, RawEvent, WsConnector};

const DEAD_LETTER_CAPACITY: usize = 32;

// ── Connection state machine ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; only reached through teardown.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSignal {
    Dial,
    Established,
    Lost,
    Failed,
    Teardown,
}

/// Exponential reconnect delay, capped, with no attempt limit.
#[derive(Debug, Clone)]
pub struct ReconnectStrategy {
    pub attempt: u32,
    pub current_delay: Duration,
    initial_delay: Duration,
    max_delay: Duration,
}

impl ReconnectStrategy {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self { attempt: 0, current_delay: initial_delay, initial_delay, max_delay }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.initial_delay;
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay;
        self.attempt += 1;
        self.current_delay = std::cmp::min(self.current_delay * 2, self.max_delay);
        delay
    }
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(5))
    }
}

/// `disconnected → connecting → connected → disconnected → connecting ...`,
/// with `closed` reachable from anywhere via teardown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMachine {
    state: ConnectionState,
    strategy: ReconnectStrategy,
}

impl ConnectionMachine {
    pub fn new(strategy: ReconnectStrategy) -> Self {
        Self { state: ConnectionState::Disconnected, strategy }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Applies a signal. Returns the new state when observers must hear about
    /// it: entering `Connected`, leaving `Connected`, and teardown.
    pub fn apply(&mut self, signal: ConnectionSignal) -> Option<ConnectionState> {
        use ConnectionSignal as S;
        use ConnectionState as C;

        let (next, report) = match (self.state, signal) {
            (C::Closed, _) => return None,
            (_, S::Teardown) => (C::Closed, true),
            (C::Disconnected, S::Dial) => (C::Connecting, false),
            (C::Connecting, S::Established) => {
                self.strategy.reset();
                (C::Connected, true)
            }
            (C::Connecting, S::Failed) => (C::Disconnected, false),
            (C::Connected, S::Lost) => (C::Disconnected, true),
            (state, signal) => {
                debug!("Ignoring {signal:?} while {state:?}");
                return None;
            }
        };
        self.state = next;
        report.then_some(next)
    }

    pub fn next_delay(&mut self) -> Duration {
        self.strategy.next_delay()
    }
}

// ── Subscriptions ────────────────────────────────────────────────────────────

pub type EventHandler = Box<dyn Fn(&LiveEvent) + Send + Sync>;
pub type StateHandler = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// Where subscribers register. The push channel implements it; components
/// receive it by injection rather than reaching for a global.
pub trait EventSource: Send + Sync {
    fn on(&self, kind: EventKind, handler: EventHandler) -> Subscription;

    /// Observes connectivity transitions (see [`ConnectionMachine::apply`]).
    fn on_connectivity(&self, handler: StateHandler) -> Subscription;

    fn state(&self) -> ConnectionState;
}

/// Unregisters its handler when dropped.
#[must_use = "dropping a subscription unregisters it"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.event_handlers.retain(|(id, _, _)| *id != self.id);
            registry.state_handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// An event that could not be routed.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub name: String,
    pub reason: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    event_handlers: Vec<(u64, EventKind, Arc<dyn Fn(&LiveEvent) + Send + Sync>)>,
    state_handlers: Vec<(u64, Arc<dyn Fn(ConnectionState) + Send + Sync>)>,
    dead_letters: VecDeque<DeadLetter>,
    state: ConnectionState,
}

/// The fan-out half of the channel.
#[derive(Clone, Default)]
pub struct EventHub {
    registry: Arc<Mutex<Registry>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscription(&self, id: u64) -> Subscription {
        Subscription { id, registry: Arc::downgrade(&self.registry) }
    }

    /// Decodes a wire event and hands it to every subscriber of its kind.
    /// Handlers run outside the registry lock, so they may subscribe or
    /// unsubscribe themselves.
    pub fn dispatch(&self, raw: RawEvent) {
        let event = match LiveEvent::from_wire(&raw.name, raw.payload) {
            Ok(event) => event,
            Err(reason) => {
                warn!("Dead-lettering push event '{}': {reason}", raw.name);
                self.dead_letter(raw.name, reason);
                return;
            }
        };

        let kind = event.kind();
        let handlers: Vec<_> = self
            .lock()
            .event_handlers
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, h)| Arc::clone(h))
            .collect();
        if handlers.is_empty() {
            debug!("No subscriber for '{kind}'");
        }
        for handler in handlers {
            handler(&event);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.lock().state = state;
    }

    fn report(&self, state: ConnectionState) {
        let handlers: Vec<_> = self.lock().state_handlers.iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler(state);
        }
    }

    fn apply(&self, machine: &mut ConnectionMachine, signal: ConnectionSignal) {
        let report = machine.apply(signal);
        self.set_state(machine.state());
        if let Some(state) = report {
            self.report(state);
        }
    }

    /// Records an event nobody could route. The log keeps the newest entries.
    pub fn dead_letter(&self, name: impl Into<String>, reason: impl Into<String>) {
        let mut registry = self.lock();
        if registry.dead_letters.len() == DEAD_LETTER_CAPACITY {
            registry.dead_letters.pop_front();
        }
        registry.dead_letters.push_back(DeadLetter {
            name: name.into(),
            reason: reason.into(),
            received_at: Utc::now(),
        });
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead_letters.iter().cloned().collect()
    }
}

impl EventSource for EventHub {
    fn on(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.event_handlers.push((id, kind, Arc::from(handler)));
        drop(registry);
        self.subscription(id)
    }

    fn on_connectivity(&self, handler: StateHandler) -> Subscription {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.state_handlers.push((id, Arc::from(handler)));
        drop(registry);
        self.subscription(id)
    }

    fn state(&self) -> ConnectionState {
        self.lock().state
    }
}

// ── Channel ──────────────────────────────────────────────────────────────────

/// Owns the session's single push connection. Created on sign-in with
/// [`PushChannel::init`], destroyed with [`PushChannel::teardown`].
pub struct PushChannel {
    hub: EventHub,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PushChannel {
    /// Connects to the configured socket endpoint with the session credential.
    pub fn init(config: &Config) -> Result<Self, AppError> {
        let connector = WsConnector::new(&config.socket_url, config.session.clone())?;
        info!("Push channel targeting {}", connector.endpoint());
        let strategy = ReconnectStrategy::new(config.reconnect_initial, config.reconnect_max);
        Ok(Self::with_connector(Arc::new(connector), strategy))
    }

    pub fn with_connector(connector: Arc<dyn Connector>, strategy: ReconnectStrategy) -> Self {
        let hub = EventHub::new();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(connector, hub.clone(), ConnectionMachine::new(strategy), shutdown_rx));
        Self { hub, shutdown, task }
    }

    /// Handle for subscribers.
    pub fn source(&self) -> EventHub {
        self.hub.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.hub.state()
    }

    pub async fn teardown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Push channel task ended abnormally: {e}");
        }
    }
}

async fn run(
    connector: Arc<dyn Connector>,
    hub: EventHub,
    mut machine: ConnectionMachine,
    mut shutdown: watch::Receiver<bool>,
) {
    'session: loop {
        hub.apply(&mut machine, ConnectionSignal::Dial);
        let attempt = tokio::select! {
            _ = shutdown.changed() => break 'session,
            attempt = connector.connect() => attempt,
        };

        match attempt {
            Ok(mut conn) => {
                hub.apply(&mut machine, ConnectionSignal::Established);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            conn.close().await;
                            break 'session;
                        }
                        next = conn.recv() => match next {
                            Ok(Some(raw)) => hub.dispatch(raw),
                            Ok(None) => {
                                info!("Push socket closed by server");
                                break;
                            }
                            Err(e) => {
                                warn!("Push socket lost: {e}");
                                break;
                            }
                        }
                    }
                }
                hub.apply(&mut machine, ConnectionSignal::Lost);
            }
            Err(e) => {
                warn!("Push connect failed: {e}");
                hub.apply(&mut machine, ConnectionSignal::Failed);
            }
        }

        let delay = machine.next_delay();
        debug!("Reconnecting in {delay:?}");
        tokio::select! {
            _ = shutdown.changed() => break 'session,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    hub.apply(&mut machine, ConnectionSignal::Teardown);
    info!("Push channel torn down");
}
