//! In-memory transport for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;
use stompflow::{
    BusStream, ClientOptions, ConnError, Frame, StompClient, StompCodec, Transport, TransportEvent,
};
use tokio::sync::mpsc;

pub const CONNECTED: &str = "CONNECTED\nversion:1.2\n\n\0";

#[derive(Default)]
struct State {
    sent: Mutex<Vec<String>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    on_open: Mutex<Vec<TransportEvent>>,
    open_error: Mutex<Option<String>>,
    send_error: Mutex<Option<String>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

/// Records every outbound text and lets the test play the broker.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<State>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events queued on every `open`, in order.
    pub fn on_open(self, events: Vec<TransportEvent>) -> Self {
        *self.state.on_open.lock().unwrap() = events;
        self
    }

    /// `Opened` followed by the given broker frame text.
    pub fn answering(self, connected: &str) -> Self {
        self.on_open(vec![
            TransportEvent::Opened(HashMap::new()),
            TransportEvent::Message(connected.to_string()),
        ])
    }

    pub fn fail_open(&self, cause: Option<&str>) {
        *self.state.open_error.lock().unwrap() = cause.map(str::to_string);
    }

    /// Make every following `send` fail with `cause` (`None` heals it).
    pub fn fail_sends(&self, cause: Option<&str>) {
        *self.state.send_error.lock().unwrap() = cause.map(str::to_string);
    }

    pub async fn inject(&self, event: TransportEvent) {
        let tx = self
            .state
            .events
            .lock()
            .unwrap()
            .clone()
            .expect("transport is not open");
        tx.send(event).await.expect("engine stopped reading");
        settle().await;
    }

    pub async fn broker_says(&self, text: &str) {
        self.inject(TransportEvent::Message(text.to_string())).await;
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.sent.lock().unwrap().clone()
    }

    /// Outbound frames, heart-beats excluded.
    pub fn sent_frames(&self) -> Vec<Frame> {
        let codec = StompCodec::new();
        self.sent()
            .iter()
            .filter(|t| t.as_str() != "\r\n")
            .map(|t| codec.decode(t).expect("client sent an undecodable frame"))
            .collect()
    }

    pub fn sent_commands(&self) -> Vec<String> {
        self.sent_frames()
            .iter()
            .map(|f| f.command.as_str().to_string())
            .collect()
    }

    pub fn pings(&self) -> usize {
        self.sent().iter().filter(|t| t.as_str() == "\r\n").count()
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, ConnError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(cause) = self.state.open_error.lock().unwrap().clone() {
            return Err(ConnError::Transport(cause));
        }
        let (tx, rx) = mpsc::channel(64);
        for event in self.state.on_open.lock().unwrap().iter() {
            tx.try_send(event.clone()).expect("script too long");
        }
        *self.state.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn send(&self, text: &str) -> Result<(), ConnError> {
        if self.state.events.lock().unwrap().is_none() {
            return Err(ConnError::NotConnected);
        }
        if let Some(cause) = self.state.send_error.lock().unwrap().clone() {
            return Err(ConnError::Transport(cause));
        }
        self.state.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.events.lock().unwrap().take();
        Ok(())
    }
}

/// Let spawned tasks drain whatever is ready.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Wait (up to two seconds) for `cond` to hold; for multi-thread tests where
/// yielding is not enough to let the session task run.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    cond()
}

/// A client whose broker answers `CONNECTED` right away.
pub async fn connected_client(options: ClientOptions) -> (ScriptedTransport, StompClient) {
    let transport = ScriptedTransport::new().answering(CONNECTED);
    let client = StompClient::new(transport.clone(), options);
    client.connect(Vec::new()).await.expect("connect");
    settle().await;
    assert!(client.is_connected(), "client did not reach Connected");
    (transport, client)
}

pub fn message(destination: &str, body: &str) -> String {
    format!(
        "MESSAGE\ndestination:{}\nmessage-id:1\nsubscription:0\n\n{}\0",
        destination, body
    )
}

/// Items already buffered on a stream, without waiting.
pub fn drain<T>(stream: &mut BusStream<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Some(Some(item)) = stream.recv().now_or_never() {
        out.push(item);
    }
    out
}
