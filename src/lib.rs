//! Async STOMP client engine over pluggable transports.
//!
//! A [`StompClient`] drives one [`Transport`] (TCP, WebSocket, or anything
//! implementing the trait): it performs the `CONNECT` handshake, negotiates
//! heart-beats, and fans inbound frames out to per-destination
//! [`Subscription`] streams.

pub mod bus;
pub mod client;
pub mod codec;
pub mod connection;
pub mod frame;
pub mod heartbeat;
pub mod matcher;
pub mod subscription;
pub mod transport;

/// Value of the `accept-version` header sent with `CONNECT`.
pub const SUPPORTED_VERSIONS: &str = "1.1, 1.2";

pub use bus::{BusStream, EventBus};
pub use client::{ClientOptions, StompClient};
pub use codec::{DecodeError, StompCodec};
pub use connection::{ConnError, Connection, ConnectionState, LifecycleEvent, LifecycleKind};
pub use frame::{Command, Frame, HeaderKey};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor, negotiate_heartbeats, parse_heartbeat_header};
pub use matcher::{
    ExactMatcher, MatchStrategy, PathMatcher, SubscriptionIdMatcher, WildcardMatcher,
};
pub use subscription::{Subscription, SubscriptionIds, SubscriptionRegistry};
pub use transport::{TcpTransport, Transport, TransportEvent, TransportFactory};
#[cfg(feature = "ws")]
pub use transport::WsTransport;
