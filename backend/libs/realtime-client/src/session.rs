//! Transport session state machine
//!
//! One session owns at most one live adapter. Every transition that
//! invalidates in-flight work (connect, disconnect, unexpected close, a
//! reconnect firing) bumps `epoch`; timers, pumps and connection attempts
//! carry the epoch they were started under and become no-ops once it moves.

use crate::config::ClientConfig;
use crate::decode::InboundMessage;
use crate::error::{ClientError, Result, TransportError};
use crate::events::{ClientEvent, DisconnectReason, EventBus, EventKind, ListenerId};
use crate::sound::{sound_for, SilentPlayer, SoundPlayer};
use crate::transport::{
    AdapterEvent, DefaultConnector, OpenRequest, OpenedTransport, TransportAdapter,
    TransportConnector, TransportKind,
};
use parking_lot::Mutex;
use resilience::{with_timeout_result, ExponentialBackoff, TimeoutError};
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub transport: Option<TransportKind>,
    pub reconnect_attempts: u32,
    pub last_message_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    User,
    Reconnect,
}

#[derive(Default)]
struct SessionState {
    status: ConnectionState,
    transport: Option<TransportKind>,
    reconnect_attempts: u32,
    last_message_id: Option<i64>,
    epoch: u64,
    adapter: Option<Arc<dyn TransportAdapter>>,
    pump: Option<AbortHandle>,
    reconnect_timer: Option<AbortHandle>,
    cancel: Option<Arc<Notify>>,
}

impl SessionState {
    /// Stop background work and hand back the adapter for closing
    fn detach(&mut self) -> Option<Arc<dyn TransportAdapter>> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(cancel) = self.cancel.take() {
            cancel.notify_one();
        }
        self.adapter.take()
    }
}

struct Inner {
    config: ClientConfig,
    backoff: ExponentialBackoff,
    connector: Arc<dyn TransportConnector>,
    sound: Arc<dyn SoundPlayer>,
    events: EventBus,
    state: Mutex<SessionState>,
}

/// Client half of the realtime channel
///
/// Tries the configured transports in priority order (WebSocket, server
/// push, poll), falls back on failure and reconnects with exponential
/// backoff after a mid-session failure.
///
/// ```rust,no_run
/// use realtime_client::{ClientConfig, EventKind, RealtimeClient};
///
/// # async fn run() -> Result<(), realtime_client::ClientError> {
/// let config = ClientConfig::default()
///     .with_primary_url("ws://localhost:8000/ws?subscriber_id=42")
///     .with_poll_url("http://localhost:8000/api/notifications/poll");
/// let client = RealtimeClient::builder(config).build()?;
///
/// client.on(EventKind::Notification, |event| println!("{event:?}"));
/// let transport = client.connect().await?;
/// println!("connected over {transport}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

pub struct ClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn TransportConnector>>,
    sound: Option<Arc<dyn SoundPlayer>>,
}

impl ClientBuilder {
    pub fn connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn sound_player(mut self, player: Arc<dyn SoundPlayer>) -> Self {
        self.sound = Some(player);
        self
    }

    pub fn build(self) -> Result<RealtimeClient> {
        self.config.validate()?;
        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(DefaultConnector::new()?),
        };

        Ok(RealtimeClient {
            inner: Arc::new(Inner {
                backoff: self.config.backoff(),
                config: self.config,
                connector,
                sound: self.sound.unwrap_or_else(|| Arc::new(SilentPlayer)),
                events: EventBus::new(),
                state: Mutex::new(SessionState::default()),
            }),
        })
    }
}

impl RealtimeClient {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            connector: None,
            sound: None,
        }
    }

    /// Open a channel, trying each configured transport in order
    ///
    /// A live session is torn down first. Resolves with the transport that
    /// opened, or with the failure once every transport has been tried.
    pub async fn connect(&self) -> Result<TransportKind> {
        let (epoch, previous) = {
            let mut state = self.inner.state.lock();
            let previous = match state.status {
                ConnectionState::Connected => Some((state.transport, state.detach())),
                _ => {
                    // Abandon any attempt or timer in flight
                    state.detach();
                    None
                }
            };
            state.epoch += 1;
            state.status = ConnectionState::Connecting;
            state.transport = None;
            (state.epoch, previous)
        };

        if let Some((transport, adapter)) = previous {
            if let Some(adapter) = adapter {
                adapter.close().await;
            }
            self.inner.events.emit(&ClientEvent::Disconnected {
                reason: DisconnectReason::UserInitiated,
                transport,
                error: None,
            });
        }

        self.inner.events.emit(&ClientEvent::Connecting);
        self.inner.establish(epoch, Origin::User).await
    }

    /// Close the active transport and cancel pending attempts and timers
    pub async fn disconnect(&self) {
        let (transport, adapter) = {
            let mut state = self.inner.state.lock();
            let adapter = state.detach();
            state.epoch += 1;
            state.status = ConnectionState::Disconnected;
            (state.transport.take(), adapter)
        };

        if let Some(adapter) = adapter {
            adapter.close().await;
        }
        info!(transport = ?transport.map(|t| t.as_str()), "realtime session disconnected");
        self.inner.events.emit(&ClientEvent::Disconnected {
            reason: DisconnectReason::UserInitiated,
            transport,
            error: None,
        });
    }

    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        self.send_raw(payload).await
    }

    /// Send a pre-encoded payload; fails with `NotConnected` unless connected
    pub async fn send_raw(&self, payload: String) -> Result<()> {
        let adapter = {
            let state = self.inner.state.lock();
            if state.status != ConnectionState::Connected {
                return Err(ClientError::NotConnected);
            }
            state.adapter.clone().ok_or(ClientError::NotConnected)?
        };

        adapter.send(payload).await.map_err(|e| {
            warn!(transport = %adapter.kind(), error = %e, "send failed");
            ClientError::from(e)
        })
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, Arc::new(handler))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().status
    }

    pub fn transport(&self) -> Option<TransportKind> {
        self.inner.state.lock().transport
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().reconnect_attempts
    }

    pub fn last_message_id(&self) -> Option<i64> {
        self.inner.state.lock().last_message_id
    }

    /// Server-assigned id of the live fallback connection, once announced
    pub fn connection_id(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .adapter
            .as_ref()
            .and_then(|adapter| adapter.connection_id())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock();
        SessionSnapshot {
            state: state.status,
            transport: state.transport,
            reconnect_attempts: state.reconnect_attempts,
            last_message_id: state.last_message_id,
        }
    }
}

impl Inner {
    fn transport_order(&self) -> Vec<(TransportKind, String)> {
        [
            (TransportKind::Primary, &self.config.primary_url),
            (TransportKind::ServerPush, &self.config.push_url),
            (TransportKind::Poll, &self.config.poll_url),
        ]
        .into_iter()
        .filter_map(|(kind, url)| url.clone().map(|url| (kind, url)))
        .collect()
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.state.lock().epoch == epoch
    }

    async fn establish(self: &Arc<Self>, epoch: u64, origin: Origin) -> Result<TransportKind> {
        let order = self.transport_order();
        let cancel = Arc::new(Notify::new());
        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return Err(ClientError::Aborted);
            }
            if order.is_empty() {
                state.status = ConnectionState::Disconnected;
                return Err(ClientError::NoTransportConfigured);
            }
            state.cancel = Some(Arc::clone(&cancel));
        }

        let mut attempted = Vec::with_capacity(order.len());
        for (index, (kind, url)) in order.iter().enumerate() {
            attempted.push(*kind);
            let request = OpenRequest {
                kind: *kind,
                url: url.clone(),
                send_url: None,
                last_message_id: self.state.lock().last_message_id,
                poll_interval: self.config.poll_interval(),
                max_consecutive_poll_failures: self.config.max_consecutive_poll_failures,
            };
            debug!(transport = %kind, "opening transport");

            let outcome = tokio::select! {
                _ = cancel.notified() => {
                    debug!(transport = %kind, "connection attempt aborted");
                    return Err(ClientError::Aborted);
                }
                outcome = with_timeout_result(self.config.connect_timeout(), self.connector.open(request)) => outcome,
            };

            let error = match outcome {
                Ok(opened) => return self.activate(epoch, opened).await,
                Err(TimeoutError::Elapsed(after)) => TransportError::Timeout(after),
                Err(TimeoutError::Inner(e)) => e,
            };

            if !self.is_current(epoch) {
                return Err(ClientError::Aborted);
            }
            warn!(transport = %kind, error = %error, "transport attempt failed");

            if let Some((next, _)) = order.get(index + 1) {
                self.events.emit(&ClientEvent::Fallback {
                    failed: *kind,
                    next: *next,
                    error,
                });
            }
        }

        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return Err(ClientError::Aborted);
            }
            state.status = ConnectionState::Disconnected;
            state.cancel = None;
        }
        warn!(?attempted, "all transports failed");
        self.events.emit(&ClientEvent::Error {
            message: "all transports failed".to_string(),
            transport: None,
        });

        if origin == Origin::Reconnect {
            self.schedule_reconnect(epoch);
        }
        Err(ClientError::AllTransportsFailed { attempted })
    }

    async fn activate(self: &Arc<Self>, epoch: u64, opened: OpenedTransport) -> Result<TransportKind> {
        let OpenedTransport { adapter, events } = opened;
        let adapter: Arc<dyn TransportAdapter> = Arc::from(adapter);
        let kind = adapter.kind();

        let accepted = {
            let mut state = self.state.lock();
            if state.epoch == epoch && state.status == ConnectionState::Connecting {
                state.status = ConnectionState::Connected;
                state.transport = Some(kind);
                state.reconnect_attempts = 0;
                state.adapter = Some(Arc::clone(&adapter));
                state.cancel = None;
                true
            } else {
                false
            }
        };
        if !accepted {
            adapter.close().await;
            return Err(ClientError::Aborted);
        }

        info!(transport = %kind, "realtime session connected");
        self.events.emit(&ClientEvent::Connected { transport: kind });

        // Started after the connect event so listeners see it before any message
        let mut state = self.state.lock();
        if state.epoch == epoch {
            let handle = tokio::spawn(pump(Arc::downgrade(self), epoch, events));
            state.pump = Some(handle.abort_handle());
        }
        Ok(kind)
    }

    fn deliver(&self, epoch: u64, payload: String) {
        let message = InboundMessage::decode(payload);
        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            if let Some(id) = message.id() {
                state.last_message_id = Some(state.last_message_id.map_or(id, |last| last.max(id)));
            }
        }

        self.events.emit(&ClientEvent::Message(message.clone()));
        if !message.is_notification() {
            return;
        }
        if let Some(json) = message.as_json() {
            self.events.emit(&ClientEvent::Notification(json.clone()));
        }
        if self.config.play_sounds {
            let cue = sound_for(message.category());
            if let Err(e) = self.sound.play(cue) {
                warn!(?cue, error = %e, "notification sound failed");
            }
        }
    }

    fn report_error(&self, epoch: u64, error: TransportError) {
        let transport = {
            let state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            state.transport
        };
        warn!(error = %error, "transport reported an error");
        self.events.emit(&ClientEvent::Error {
            message: error.to_string(),
            transport,
        });
    }

    async fn on_unexpected_close(self: &Arc<Self>, epoch: u64, cause: Option<TransportError>) {
        let (transport, adapter, next_epoch) = {
            let mut state = self.state.lock();
            if state.epoch != epoch || state.status != ConnectionState::Connected {
                return;
            }
            // Called from the pump itself; let it finish instead of aborting it
            state.pump.take();
            let adapter = state.detach();
            state.epoch += 1;
            state.status = ConnectionState::Disconnected;
            (state.transport.take(), adapter, state.epoch)
        };

        if let Some(adapter) = adapter {
            adapter.close().await;
        }
        let error = cause.unwrap_or_else(|| TransportError::Closed("closed by peer".to_string()));
        warn!(transport = ?transport.map(|t| t.as_str()), error = %error, "realtime session lost");
        self.events.emit(&ClientEvent::Disconnected {
            reason: DisconnectReason::Error,
            transport,
            error: Some(error),
        });

        self.schedule_reconnect(next_epoch);
    }

    fn schedule_reconnect(self: &Arc<Self>, epoch: u64) {
        let (attempt, delay) = {
            let mut state = self.state.lock();
            if state.epoch != epoch || state.status != ConnectionState::Disconnected {
                return;
            }
            let attempt = state.reconnect_attempts;
            if !self.backoff.allows(attempt) {
                info!(attempts = attempt, "reconnect attempts exhausted");
                return;
            }
            let delay = self.backoff.delay_for(attempt);
            state.reconnect_attempts = attempt + 1;

            let weak = Arc::downgrade(self);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(inner) = weak.upgrade() {
                    inner.fire_reconnect(epoch).await;
                }
            });
            state.reconnect_timer = Some(timer.abort_handle());
            (attempt + 1, delay)
        };

        info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.events.emit(&ClientEvent::Reconnect { attempt, delay });
    }

    async fn fire_reconnect(self: &Arc<Self>, epoch: u64) {
        let next_epoch = {
            let mut state = self.state.lock();
            if state.epoch != epoch || state.status != ConnectionState::Disconnected {
                return;
            }
            // Running inside the timer task; drop the handle without aborting
            state.reconnect_timer.take();
            state.epoch += 1;
            state.status = ConnectionState::Connecting;
            state.epoch
        };

        self.events.emit(&ClientEvent::Connecting);
        if let Err(e) = self.establish(next_epoch, Origin::Reconnect).await {
            debug!(error = %e, "reconnect attempt failed");
        }
    }
}

async fn pump(inner: Weak<Inner>, epoch: u64, mut events: mpsc::UnboundedReceiver<AdapterEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            AdapterEvent::Message(payload) => inner.deliver(epoch, payload),
            AdapterEvent::Error(error) => inner.report_error(epoch, error),
            AdapterEvent::Closed(cause) => {
                inner.on_unexpected_close(epoch, cause).await;
                return;
            }
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.on_unexpected_close(epoch, None).await;
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
    }
}
