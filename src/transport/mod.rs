//! The I/O boundary of the client.
//!
//! The protocol engine never touches sockets. It drives a [`Transport`],
//! which delivers everything that happens on the wire as a single ordered
//! stream of [`TransportEvent`]s.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::connection::ConnError;

pub mod tcp;
#[cfg(feature = "ws")]
pub mod ws;

pub use tcp::TcpTransport;
#[cfg(feature = "ws")]
pub use ws::WsTransport;

/// Capacity of the event channel handed out by transports in this crate.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything a transport reports back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The duplex connection is up. Carries response metadata, e.g. the
    /// HTTP upgrade response headers of a WebSocket handshake.
    Opened(HashMap<String, String>),
    /// One inbound text message (a STOMP frame or a bare heartbeat).
    Message(String),
    /// The connection was closed by either side.
    Closed,
    /// The connection failed; a `Closed` event may or may not follow.
    Failed(String),
}

/// A duplex, message-oriented text connection.
///
/// `open` is cold: nothing happens on the wire until it is called, and every
/// event after that is delivered on the returned receiver in arrival order.
/// A transport instance serves one connection at a time; calling `open`
/// again after `close` starts a fresh connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start connecting. The returned receiver yields `Opened` once the
    /// connection is usable, followed by messages and finally `Closed`.
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, ConnError>;

    /// Write one text message.
    async fn send(&self, text: &str) -> Result<(), ConnError>;

    /// Close the connection. Closing an already closed transport succeeds.
    async fn close(&self) -> Result<(), ConnError>;
}

/// Builds a transport from a URI and connection-level headers (for example
/// HTTP headers for the WebSocket upgrade request).
pub trait TransportFactory {
    type Output: Transport;

    fn create(self, uri: &str, headers: HashMap<String, String>) -> Self::Output;
}

impl<F, T> TransportFactory for F
where
    F: FnOnce(&str, HashMap<String, String>) -> T,
    T: Transport,
{
    type Output = T;

    fn create(self, uri: &str, headers: HashMap<String, String>) -> T {
        self(uri, headers)
    }
}
