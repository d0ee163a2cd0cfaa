//! Reconnecting socket client.
//!
//! Each connect starts a new generation. Events from a connection whose
//! generation is no longer current are ignored, which is what lets
//! `disconnect()` and `connect()` drop a socket without racing its close.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use shared::protocol::{WsMessage, WILDCARD_TAG};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::AbortHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::Settings,
    error::{ConfigError, WsError},
    session::SessionHandler,
};

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_ABNORMAL: u16 = 1006;
const CLOSE_NO_STATUS: u16 = 1005;

#[derive(Debug, Clone)]
pub struct WsOptions {
    pub url: Url,
    pub client_id: String,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl WsOptions {
    pub fn new(url: Url, client_id: impl Into<String>) -> Self {
        let defaults = Settings::default();
        Self {
            url,
            client_id: client_id.into(),
            auto_reconnect: defaults.auto_reconnect,
            max_reconnect_attempts: defaults.max_reconnect_attempts,
            reconnect_delay: defaults.reconnect_delay,
            max_reconnect_delay: defaults.max_reconnect_delay,
        }
    }

    /// Uses the configured client id, or a fresh v4 uuid.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            url: settings.ws_endpoint()?,
            client_id: settings
                .client_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            auto_reconnect: settings.auto_reconnect,
            max_reconnect_attempts: settings.max_reconnect_attempts,
            reconnect_delay: settings.reconnect_delay,
            max_reconnect_delay: settings.max_reconnect_delay,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFault {
    Transport(String),
    Reconnecting { attempt: u32, max: u32 },
    ReconnectExhausted,
}

impl fmt::Display for WsFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "Connection error: {message}"),
            Self::Reconnecting { attempt, max } => {
                write!(f, "Connection lost. Reconnecting ({attempt}/{max})...")
            }
            Self::ReconnectExhausted => {
                f.write_str("Connection lost. Maximum reconnection attempts reached.")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    Opened,
    Closed { code: u16, reason: String },
    ReconnectScheduled { attempt: u32, delay: Duration },
    ReconnectExhausted,
}

/// `min(base * 2^(attempt - 1), max_delay)` for a 1-based attempt.
pub fn backoff_delay(base: Duration, max_delay: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max_delay)
}

type Handler = Arc<dyn Fn(&WsMessage) + Send + Sync>;

#[derive(Default)]
struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<(u64, Handler)>>>,
}

impl HandlerRegistry {
    fn snapshot(&self, tag: &str) -> Vec<Handler> {
        let handlers = lock(&self.handlers);
        let exact = handlers.get(tag).into_iter().flatten();
        let wildcard = if tag == WILDCARD_TAG {
            None
        } else {
            handlers.get(WILDCARD_TAG)
        };
        exact
            .chain(wildcard.into_iter().flatten())
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    fn remove(&self, tag: &str, id: u64) {
        let mut handlers = lock(&self.handlers);
        if let Some(list) = handlers.get_mut(tag) {
            list.retain(|(handler_id, _)| *handler_id != id);
            if list.is_empty() {
                handlers.remove(tag);
            }
        }
    }
}

/// Handle for one registered callback.
pub struct HandlerRegistration {
    registry: Weak<HandlerRegistry>,
    tag: String,
    id: u64,
}

impl HandlerRegistration {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn unregister(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.tag, self.id);
        }
    }
}

struct Connection {
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    task: AbortHandle,
}

#[derive(Default)]
struct WsState {
    generation: u64,
    connection: Option<Connection>,
    queue: VecDeque<WsMessage>,
    reconnect_attempts: u32,
    reconnect_timer: Option<AbortHandle>,
    destroyed: bool,
}

impl WsState {
    fn outbound(&self) -> Option<&mpsc::UnboundedSender<Message>> {
        self.connection
            .as_ref()
            .and_then(|connection| connection.outbound.as_ref())
    }
}

struct WsShared {
    options: WsOptions,
    session: Arc<dyn SessionHandler>,
    state: Mutex<WsState>,
    handlers: Arc<HandlerRegistry>,
    status: watch::Sender<WsStatus>,
    fault: watch::Sender<Option<WsFault>>,
    events: broadcast::Sender<WsEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct WsClient {
    shared: Arc<WsShared>,
}

impl WsClient {
    pub fn new(options: WsOptions, session: Arc<dyn SessionHandler>) -> Self {
        let (status, _) = watch::channel(WsStatus::Disconnected);
        let (fault, _) = watch::channel(None);
        let (events, _) = broadcast::channel(1024);
        Self {
            shared: Arc::new(WsShared {
                options,
                session,
                state: Mutex::new(WsState::default()),
                handlers: Arc::new(HandlerRegistry::default()),
                status,
                fault,
                events,
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.shared.options.client_id
    }

    /// Opens a fresh connection, dropping the current one first.
    pub fn connect(&self) -> Result<(), WsError> {
        let mut state = lock(&self.shared.state);
        if state.destroyed {
            return Err(WsError::Destroyed);
        }
        self.shared.start_connection(&mut state);
        Ok(())
    }

    pub fn disconnect(&self) {
        let mut state = lock(&self.shared.state);
        self.shared.shut_down(&mut state);
    }

    /// Disconnects and releases every handler and queued message. Terminal.
    pub fn destroy(&self) {
        let mut state = lock(&self.shared.state);
        self.shared.shut_down(&mut state);
        state.queue.clear();
        state.destroyed = true;
        lock(&self.shared.handlers.handlers).clear();
        info!(client_id = %self.shared.options.client_id, "ws: client destroyed");
    }

    /// Sends now when open, otherwise queues until the next open.
    pub fn send(&self, message: WsMessage) {
        let mut state = lock(&self.shared.state);
        if state.destroyed {
            debug!(kind = %message.kind, "ws: dropping message for destroyed client");
            return;
        }
        if let Some(outbound) = state.outbound() {
            match serde_json::to_string(&message) {
                Ok(text) => {
                    if outbound.send(Message::Text(text)).is_ok() {
                        return;
                    }
                }
                Err(err) => {
                    warn!(kind = %message.kind, error = %err, "ws: failed to encode message");
                    return;
                }
            }
        }
        state.queue.push_back(message);
    }

    pub fn on<F>(&self, tag: impl Into<String>, handler: F) -> HandlerRegistration
    where
        F: Fn(&WsMessage) + Send + Sync + 'static,
    {
        let tag = tag.into();
        let registry = &self.shared.handlers;
        let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&registry.handlers)
            .entry(tag.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        HandlerRegistration {
            registry: Arc::downgrade(registry),
            tag,
            id,
        }
    }

    pub fn status(&self) -> WsStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<WsStatus> {
        self.shared.status.subscribe()
    }

    pub fn fault(&self) -> Option<WsFault> {
        self.shared.fault.borrow().clone()
    }

    pub fn subscribe_faults(&self) -> watch::Receiver<Option<WsFault>> {
        self.shared.fault.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WsEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == WsStatus::Connected
    }

    pub fn queued_len(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.shared.state).reconnect_attempts
    }
}

impl WsShared {
    fn set_status(&self, status: WsStatus) {
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    fn set_fault(&self, fault: Option<WsFault>) {
        self.fault.send_if_modified(|current| {
            let changed = *current != fault;
            *current = fault;
            changed
        });
    }

    fn connection_url(&self) -> Url {
        let mut url = self.options.url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("clientId", &self.options.client_id);
            if let Some(user) = self.session.current_user() {
                query.append_pair("userId", user.id.as_str());
            }
        }
        url
    }

    fn start_connection(self: &Arc<Self>, state: &mut WsState) {
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        close_connection(state, CLOSE_NORMAL, "Reconnecting");

        state.generation += 1;
        let generation = state.generation;
        let url = self.connection_url();
        info!(generation, url = %self.options.url, "ws: connecting");
        self.set_status(WsStatus::Connecting);

        let task = tokio::spawn(Arc::clone(self).run_connection(generation, url));
        state.connection = Some(Connection {
            generation,
            outbound: None,
            task: task.abort_handle(),
        });
    }

    fn shut_down(&self, state: &mut WsState) {
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        state.reconnect_attempts = self.options.max_reconnect_attempts;
        state.generation += 1;
        close_connection(state, CLOSE_NORMAL, "Client disconnect");
        self.set_status(WsStatus::Disconnected);
        self.set_fault(None);
    }

    async fn run_connection(self: Arc<Self>, generation: u64, url: Url) {
        let stream = match connect_async(url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(err) => {
                warn!(generation, error = %err, "ws: connection failed");
                self.on_transport_error(generation, err.to_string());
                self.on_closed(generation, CLOSE_ABNORMAL, String::new());
                return;
            }
        };
        let (mut writer, mut reader) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        if !self.on_open(generation, outbound_tx) {
            let _ = writer.close().await;
            return;
        }

        let (code, reason) = loop {
            tokio::select! {
                outbound = outbound_rx.recv() => match outbound {
                    Some(Message::Close(frame)) => {
                        let _ = writer.send(Message::Close(frame)).await;
                        break (CLOSE_NORMAL, String::new());
                    }
                    Some(message) => {
                        if let Err(err) = writer.send(message).await {
                            self.on_transport_error(generation, err.to_string());
                            break (CLOSE_ABNORMAL, String::new());
                        }
                    }
                    None => {
                        let _ = writer.close().await;
                        break (CLOSE_NORMAL, String::new());
                    }
                },
                inbound = reader.next() => match inbound {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|frame| (u16::from(frame.code), frame.reason.into_owned()))
                            .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        self.on_transport_error(generation, err.to_string());
                        break (CLOSE_ABNORMAL, String::new());
                    }
                    None => break (CLOSE_ABNORMAL, String::new()),
                },
            }
        };
        self.on_closed(generation, code, reason);
    }

    /// Registers, then flushes the queue, before publishing the writer.
    fn on_open(&self, generation: u64, outbound: mpsc::UnboundedSender<Message>) -> bool {
        let mut state = lock(&self.state);
        if state.destroyed || state.generation != generation {
            return false;
        }
        state.reconnect_attempts = 0;

        let register = WsMessage::register(&self.options.client_id);
        let queued: Vec<WsMessage> = state.queue.drain(..).collect();
        let flushed = queued.len();
        for message in std::iter::once(register).chain(queued) {
            match serde_json::to_string(&message) {
                Ok(text) => {
                    let _ = outbound.send(Message::Text(text));
                }
                Err(err) => warn!(kind = %message.kind, error = %err, "ws: failed to encode message"),
            }
        }
        if let Some(connection) = state
            .connection
            .as_mut()
            .filter(|connection| connection.generation == generation)
        {
            connection.outbound = Some(outbound);
        }

        info!(generation, flushed, "ws: connected");
        self.set_status(WsStatus::Connected);
        self.set_fault(None);
        let _ = self.events.send(WsEvent::Opened);
        true
    }

    fn on_transport_error(&self, generation: u64, message: String) {
        let state = lock(&self.state);
        if state.destroyed || state.generation != generation {
            return;
        }
        self.set_status(WsStatus::Error);
        self.set_fault(Some(WsFault::Transport(message)));
    }

    fn on_closed(self: &Arc<Self>, generation: u64, code: u16, reason: String) {
        let mut state = lock(&self.state);
        if state.destroyed || state.generation != generation {
            return;
        }
        state.connection = None;
        info!(generation, code, reason = %reason, "ws: connection closed");
        let _ = self.events.send(WsEvent::Closed { code, reason });

        if code == CLOSE_NORMAL || !self.options.auto_reconnect {
            self.set_status(WsStatus::Disconnected);
            return;
        }

        let max = self.options.max_reconnect_attempts;
        if state.reconnect_attempts >= max {
            error!(attempts = state.reconnect_attempts, "ws: reconnect attempts exhausted");
            self.set_status(WsStatus::Error);
            self.set_fault(Some(WsFault::ReconnectExhausted));
            let _ = self.events.send(WsEvent::ReconnectExhausted);
            return;
        }

        state.reconnect_attempts += 1;
        let attempt = state.reconnect_attempts;
        let delay = backoff_delay(
            self.options.reconnect_delay,
            self.options.max_reconnect_delay,
            attempt,
        );
        info!(
            attempt,
            max,
            delay_ms = delay.as_millis() as u64,
            "ws: reconnect scheduled"
        );
        self.set_status(WsStatus::Disconnected);
        self.set_fault(Some(WsFault::Reconnecting { attempt, max }));
        let _ = self.events.send(WsEvent::ReconnectScheduled { attempt, delay });

        let shared = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.fire_reconnect(generation);
        });
        state.reconnect_timer = Some(timer.abort_handle());
    }

    fn fire_reconnect(self: &Arc<Self>, closed_generation: u64) {
        let mut state = lock(&self.state);
        if state.destroyed || state.generation != closed_generation {
            return;
        }
        state.reconnect_timer = None;
        self.start_connection(&mut state);
    }

    fn dispatch(&self, text: &str) {
        let message = match serde_json::from_str::<WsMessage>(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "ws: dropping malformed frame");
                return;
            }
        };
        debug!(kind = %message.kind, "ws: message received");

        for handler in self.handlers.snapshot(&message.kind) {
            if catch_unwind(AssertUnwindSafe(|| handler(&message))).is_err() {
                error!(kind = %message.kind, "ws: message handler panicked");
            }
        }
    }
}

/// Closes whatever the state holds: an open socket gets a close frame, a
/// handshake still in progress is aborted.
fn close_connection(state: &mut WsState, code: u16, reason: &'static str) {
    let Some(connection) = state.connection.take() else {
        return;
    };
    match connection.outbound {
        Some(outbound) => {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            };
            if outbound.send(Message::Close(Some(frame))).is_err() {
                connection.task.abort();
            }
        }
        None => connection.task.abort(),
    }
}

#[cfg(test)]
#[path = "tests/ws_tests.rs"]
mod tests;
