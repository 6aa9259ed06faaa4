use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusStream, DEFAULT_BUS_CAPACITY, EventBus};
use crate::codec::{DecodeError, StompCodec};
use crate::frame::{Command, Frame};
use crate::heartbeat::HeartbeatMonitor;
use crate::transport::{Transport, TransportEvent};

/// Errors returned by `Connection` operations.
#[derive(Error, Debug)]
pub enum ConnError {
    /// I/O-level error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The transport failed to open, write or close
    #[error("transport error: {0}")]
    Transport(String),
    /// Protocol-level error
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Inbound text that is not a STOMP frame
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    /// The operation needs an established STOMP session
    #[error("not connected")]
    NotConnected,
    /// `connect` was called while a session is connecting or connected
    #[error("already connected")]
    AlreadyConnected,
}

/// Lifecycle of the STOMP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// What a [`LifecycleEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    Opened,
    Closed,
    Error,
    FailedServerHeartbeat,
}

/// Broadcast notification about the connection.
///
/// Events are advisory; [`ConnectionState`] is the authoritative state.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub cause: Option<Arc<ConnError>>,
    /// Metadata reported by the transport on open (e.g. upgrade response
    /// headers); empty for other kinds.
    pub response_headers: HashMap<String, String>,
}

impl LifecycleEvent {
    fn of(kind: LifecycleKind) -> Self {
        Self {
            kind,
            cause: None,
            response_headers: HashMap::new(),
        }
    }

    pub fn opened(response_headers: HashMap<String, String>) -> Self {
        Self {
            response_headers,
            ..Self::of(LifecycleKind::Opened)
        }
    }

    pub fn closed() -> Self {
        Self::of(LifecycleKind::Closed)
    }

    pub fn error(cause: ConnError) -> Self {
        Self {
            cause: Some(Arc::new(cause)),
            ..Self::of(LifecycleKind::Error)
        }
    }

    pub fn failed_server_heartbeat() -> Self {
        Self::of(LifecycleKind::FailedServerHeartbeat)
    }
}

type TeardownHook = Box<dyn Fn() + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// An active session: its id and the token that stops its event loop.
struct Session {
    id: u64,
    token: CancellationToken,
}

struct Inner {
    transport: Arc<dyn Transport>,
    codec: StompCodec,
    state: AtomicU8,
    heartbeat: HeartbeatMonitor,
    messages: EventBus<Frame>,
    lifecycle: EventBus<LifecycleEvent>,
    connect_headers: Mutex<Vec<(String, String)>>,
    session: Mutex<Option<Session>>,
    session_counter: AtomicU64,
    teardown_hooks: Mutex<Vec<TeardownHook>>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Run `f` while holding the session lock, only if `session_id` is still
    /// the current session. Teardown takes the same lock, so `f` never
    /// observes a half torn down session.
    fn with_session<R>(&self, session_id: u64, f: impl FnOnce() -> R) -> Option<R> {
        let current = lock(&self.session);
        match current.as_ref() {
            Some(s) if s.id == session_id && !s.token.is_cancelled() => Some(f()),
            _ => None,
        }
    }

    async fn on_opened(
        &self,
        token: &CancellationToken,
        response_headers: HashMap<String, String>,
    ) {
        if token.is_cancelled() {
            return;
        }
        let desired = self.heartbeat.config();
        let extra = lock(&self.connect_headers).clone();
        let connect = Frame::connect(
            desired.desired_client_send_ms,
            desired.desired_server_watch_ms,
            &extra,
        );
        tracing::debug!("transport opened, sending CONNECT");
        if let Err(e) = self.transport.send(&self.codec.encode(&connect)).await {
            tracing::warn!(error = %e, "failed to send CONNECT");
            self.lifecycle.publish(LifecycleEvent::error(e));
        }
        self.lifecycle
            .publish(LifecycleEvent::opened(response_headers));
    }

    fn on_message(&self, session_id: u64, text: &str) {
        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable inbound frame");
                return;
            }
        };
        let keep = self.with_session(session_id, || {
            if !self.heartbeat.consume(&frame) {
                return false;
            }
            if frame.command == Command::Connected {
                tracing::debug!(headers = ?frame.headers, "CONNECTED");
                let flipped = self.state.compare_exchange(
                    ConnectionState::Connecting as u8,
                    ConnectionState::Connected as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                if flipped.is_err() {
                    tracing::debug!(state = ?self.state(), "ignoring CONNECTED");
                }
            }
            true
        });
        match keep {
            Some(true) => {}
            Some(false) => return,
            None => {
                tracing::trace!(session = session_id, "dropping frame of a finished session");
                return;
            }
        }
        if frame.command == Command::Error {
            tracing::warn!(
                message = frame.get_header("message").unwrap_or(""),
                "broker sent ERROR frame"
            );
        }
        self.messages.publish(frame);
    }

    /// Tear down the current session. With `only` set, the teardown is
    /// skipped unless that session is still the current one.
    async fn teardown(&self, only: Option<u64>) -> Result<(), ConnError> {
        {
            let mut current = lock(&self.session);
            let stale = match (current.as_ref(), only) {
                (None, _) => true,
                (Some(s), Some(id)) => s.id != id,
                (Some(_), None) => false,
            };
            if stale {
                return Ok(());
            }
            if let Some(session) = current.take() {
                session.token.cancel();
            }
            self.heartbeat.shutdown();
            self.set_state(ConnectionState::Disconnected);
        }

        for hook in lock(&self.teardown_hooks).iter() {
            hook();
        }
        tracing::debug!("stomp disconnected");
        self.lifecycle.publish(LifecycleEvent::closed());
        self.transport.close().await
    }
}

async fn run_session(
    inner: Arc<Inner>,
    mut events: mpsc::Receiver<TransportEvent>,
    session_id: u64,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Some(TransportEvent::Opened(headers)) => inner.on_opened(&token, headers).await,
            Some(TransportEvent::Message(text)) => inner.on_message(session_id, &text),
            Some(TransportEvent::Failed(cause)) => {
                tracing::warn!(%cause, "transport failure");
                inner
                    .lifecycle
                    .publish(LifecycleEvent::error(ConnError::Transport(cause)));
                if let Err(e) = inner.teardown(Some(session_id)).await {
                    tracing::warn!(error = %e, "failed to close transport");
                }
                break;
            }
            Some(TransportEvent::Closed) | None => {
                tracing::debug!("transport closed");
                if let Err(e) = inner.teardown(Some(session_id)).await {
                    tracing::warn!(error = %e, "failed to close transport");
                }
                break;
            }
        }
    }
}

/// The protocol engine for one logical STOMP connection.
///
/// `Connection` owns the transport, runs the CONNECT handshake, feeds inbound
/// frames through the [`HeartbeatMonitor`] and publishes them on a shared
/// message bus. Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>, codec: StompCodec) -> Self {
        Self::with_capacity(transport, codec, DEFAULT_BUS_CAPACITY)
    }

    /// Parameters
    /// - `transport`: the exclusive I/O boundary for this engine.
    /// - `codec`: frame codec (carries the legacy whitespace flag).
    /// - `bus_capacity`: items retained per bus for slow readers.
    pub fn with_capacity(
        transport: Arc<dyn Transport>,
        codec: StompCodec,
        bus_capacity: usize,
    ) -> Self {
        let lifecycle = EventBus::new("lifecycle", bus_capacity);
        let heartbeat = HeartbeatMonitor::new(transport.clone(), lifecycle.clone());
        Self {
            inner: Arc::new(Inner {
                transport,
                codec,
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                heartbeat,
                messages: EventBus::new("messages", bus_capacity),
                lifecycle,
                connect_headers: Mutex::new(Vec::new()),
                session: Mutex::new(None),
                session_counter: AtomicU64::new(1),
                teardown_hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Open the transport and start a session.
    ///
    /// Parameters
    /// - `headers`: extra `CONNECT` headers (login, passcode, host, ...),
    ///   remembered for [`Connection::reconnect`].
    ///
    /// Returns once the transport is open; the session becomes
    /// [`ConnectionState::Connected`] when the broker answers `CONNECTED`.
    /// Fails with `AlreadyConnected` while a session is active.
    pub async fn connect(&self, headers: Vec<(String, String)>) -> Result<(), ConnError> {
        let (session_id, token) = {
            let mut current = lock(&self.inner.session);
            if current.is_some() {
                tracing::debug!("already connected, ignoring connect");
                return Err(ConnError::AlreadyConnected);
            }
            let id = self.inner.session_counter.fetch_add(1, Ordering::SeqCst);
            let token = CancellationToken::new();
            *current = Some(Session {
                id,
                token: token.clone(),
            });
            self.inner.set_state(ConnectionState::Connecting);
            (id, token)
        };
        *lock(&self.inner.connect_headers) = headers;
        tracing::debug!(session = session_id, "connecting");

        let events = match self.inner.transport.open().await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "failed to open transport");
                {
                    let mut current = lock(&self.inner.session);
                    if current.as_ref().is_some_and(|s| s.id == session_id) {
                        current.take();
                        self.inner.set_state(ConnectionState::Disconnected);
                    }
                }
                self.inner.lifecycle.publish(LifecycleEvent::error(
                    ConnError::Transport(e.to_string()),
                ));
                return Err(e);
            }
        };

        if token.is_cancelled() {
            // disconnect() won the race while the transport was opening
            {
                let current = lock(&self.inner.session);
                if current.is_none() {
                    self.inner.set_state(ConnectionState::Disconnected);
                }
            }
            self.inner.transport.close().await?;
            return Err(ConnError::NotConnected);
        }

        tokio::spawn(run_session(self.inner.clone(), events, session_id, token));
        Ok(())
    }

    /// Connect again with the headers of the last `connect` call.
    pub async fn reconnect(&self) -> Result<(), ConnError> {
        let headers = lock(&self.inner.connect_headers).clone();
        self.connect(headers).await
    }

    /// Stop the session: heart-beat timers are cancelled, the event loop is
    /// stopped, a `Closed` event is published and the transport is closed.
    ///
    /// Calling this when already disconnected is a successful no-op, and it
    /// is safe to call from a lifecycle event handler.
    pub async fn disconnect(&self) -> Result<(), ConnError> {
        self.inner.teardown(None).await
    }

    /// Encode and write a frame. Requires an established session.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), ConnError> {
        if self.state() != ConnectionState::Connected {
            return Err(ConnError::NotConnected);
        }
        let text = self.inner.codec.encode(&frame);
        tracing::trace!(command = %frame.command, "sending frame");
        self.inner.transport.send(&text).await?;
        self.inner.heartbeat.client_activity();
        Ok(())
    }

    /// Send `body` (if any) to `destination`.
    pub async fn send(&self, destination: &str, body: Option<&str>) -> Result<(), ConnError> {
        self.send_frame(Frame::send(destination, body)).await
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Every inbound frame that survived heart-beat filtering.
    pub fn messages(&self) -> BusStream<Frame> {
        self.inner.messages.subscribe()
    }

    pub fn lifecycle(&self) -> BusStream<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.inner.heartbeat
    }

    /// Register a callback run on every session teardown, before the
    /// `Closed` event is published.
    pub fn on_teardown(&self, hook: impl Fn() + Send + Sync + 'static) {
        lock(&self.inner.teardown_hooks).push(Box::new(hook));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Transport that opens a channel and records writes.
    struct LoopbackTransport {
        sent: Mutex<Vec<String>>,
        events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
        closes: AtomicU64,
    }

    impl LoopbackTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                events: Mutex::new(None),
                closes: AtomicU64::new(0),
            })
        }

        fn sender(&self) -> mpsc::Sender<TransportEvent> {
            lock(&self.events).clone().expect("transport not opened")
        }
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, ConnError> {
            let (tx, rx) = mpsc::channel(16);
            *lock(&self.events) = Some(tx);
            Ok(rx)
        }

        async fn send(&self, text: &str) -> Result<(), ConnError> {
            lock(&self.sent).push(text.to_string());
            Ok(())
        }

        async fn close(&self) -> Result<(), ConnError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_requires_connected_state() {
        let transport = LoopbackTransport::new();
        let conn = Connection::new(transport.clone(), StompCodec::new());
        let err = conn.send("/queue/a", Some("x")).await.unwrap_err();
        assert!(matches!(err, ConnError::NotConnected));
        assert!(lock(&transport.sent).is_empty());
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_noop() {
        let transport = LoopbackTransport::new();
        let conn = Connection::new(transport.clone(), StompCodec::new());
        let mut lifecycle = conn.lifecycle();
        conn.disconnect().await.expect("disconnect");
        conn.disconnect().await.expect("disconnect");
        assert_eq!(transport.closes.load(Ordering::SeqCst), 0);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), lifecycle.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let transport = LoopbackTransport::new();
        let conn = Connection::new(transport.clone(), StompCodec::new());
        conn.connect(Vec::new()).await.expect("connect");
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(matches!(
            conn.connect(Vec::new()).await,
            Err(ConnError::AlreadyConnected)
        ));
        conn.disconnect().await.expect("disconnect");
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn teardown_hooks_run_once_per_session() {
        let transport = LoopbackTransport::new();
        let conn = Connection::new(transport.clone(), StompCodec::new());
        let runs = Arc::new(AtomicU64::new(0));
        let counter = runs.clone();
        conn.on_teardown(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        conn.connect(Vec::new()).await.expect("connect");
        conn.disconnect().await.expect("disconnect");
        conn.disconnect().await.expect("disconnect");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undecodable_frame_is_dropped() {
        let transport = LoopbackTransport::new();
        let conn = Connection::new(transport.clone(), StompCodec::new());
        let mut messages = conn.messages();
        conn.connect(Vec::new()).await.expect("connect");
        let tx = transport.sender();
        tx.send(TransportEvent::Message("BOGUS\n\n\0".into()))
            .await
            .unwrap();
        tx.send(TransportEvent::Message("CONNECTED\nversion:1.2\n\n\0".into()))
            .await
            .unwrap();
        let frame = messages.recv().await.expect("frame");
        assert_eq!(frame.command, Command::Connected);
        assert!(conn.is_connected());
    }
}
