use std::collections::HashMap;
use std::sync::Arc;

use crate::bus::{BusStream, DEFAULT_BUS_CAPACITY};
use crate::codec::StompCodec;
use crate::connection::{ConnError, Connection, ConnectionState, LifecycleEvent};
use crate::frame::Frame;
use crate::heartbeat::HeartbeatConfig;
use crate::matcher::{MatchStrategy, PathMatcher};
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::transport::{Transport, TransportFactory};

/// Options for building a [`StompClient`].
///
/// ```
/// use stompflow::{ClientOptions, MatchStrategy};
///
/// let options = ClientOptions::new()
///     .heartbeat(10_000, 10_000)
///     .match_strategy(MatchStrategy::Wildcard);
/// assert_eq!(options.client_heartbeat_ms, 10_000);
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Desired client→server heart-beat period in ms (`0` disables)
    pub client_heartbeat_ms: u64,
    /// Desired tolerated server silence in ms (`0` disables)
    pub server_heartbeat_ms: u64,
    /// Pad bodies with two extra newlines for pre-1.1 brokers
    pub legacy_whitespace: bool,
    /// Items retained per bus for slow readers
    pub bus_capacity: usize,
    pub match_strategy: MatchStrategy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_heartbeat_ms: 0,
            server_heartbeat_ms: 0,
            legacy_whitespace: false,
            bus_capacity: DEFAULT_BUS_CAPACITY,
            match_strategy: MatchStrategy::Exact,
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set both heart-beat intervals (ms).
    pub fn heartbeat(mut self, client_send_ms: u64, server_watch_ms: u64) -> Self {
        self.client_heartbeat_ms = client_send_ms;
        self.server_heartbeat_ms = server_watch_ms;
        self
    }

    pub fn client_heartbeat_ms(mut self, ms: u64) -> Self {
        self.client_heartbeat_ms = ms;
        self
    }

    pub fn server_heartbeat_ms(mut self, ms: u64) -> Self {
        self.server_heartbeat_ms = ms;
        self
    }

    pub fn legacy_whitespace(mut self, enabled: bool) -> Self {
        self.legacy_whitespace = enabled;
        self
    }

    pub fn bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    pub fn match_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.match_strategy = strategy;
        self
    }
}

/// A STOMP client over one [`Transport`].
///
/// The client ties together the [`Connection`] engine and the
/// [`SubscriptionRegistry`]. Nothing happens on the wire until
/// [`StompClient::connect`] is called.
///
/// ```no_run
/// # async fn demo() -> Result<(), stompflow::ConnError> {
/// use stompflow::{ClientOptions, StompClient, TcpTransport};
///
/// let client = StompClient::new(TcpTransport::new("127.0.0.1:61613"), ClientOptions::new());
/// client.connect(vec![("login".into(), "guest".into())]).await?;
/// let mut prices = client.subscribe("/topic/prices", Vec::new()).await?;
/// while let Some(frame) = prices.recv().await {
///     println!("{}", frame);
/// }
/// # Ok(())
/// # }
/// ```
pub struct StompClient {
    connection: Connection,
    registry: SubscriptionRegistry,
    connect_headers: Vec<(String, String)>,
}

impl StompClient {
    pub fn new<T: Transport>(transport: T, options: ClientOptions) -> Self {
        Self::from_shared(Arc::new(transport), options)
    }

    /// Build a client around an already shared transport.
    pub fn from_shared(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        let codec = StompCodec::with_legacy_whitespace(options.legacy_whitespace);
        let connection = Connection::with_capacity(transport, codec, options.bus_capacity);
        connection
            .heartbeat()
            .set_client_send_ms(options.client_heartbeat_ms);
        connection
            .heartbeat()
            .set_server_watch_ms(options.server_heartbeat_ms);
        let registry = SubscriptionRegistry::new(connection.clone(), options.match_strategy);
        Self {
            connection,
            registry,
            connect_headers: Vec::new(),
        }
    }

    /// Create a client through a transport factory.
    ///
    /// Parameters
    /// - `factory`: builds the transport from `uri` and `connect_headers`.
    /// - `uri`: broker address, e.g. `ws://localhost:15674/ws`.
    /// - `connect_headers`: handed to the factory (for example upgrade
    ///   request headers) and used as default `CONNECT` headers by
    ///   [`StompClient::connect_default`].
    pub fn create<F: TransportFactory>(
        factory: F,
        uri: &str,
        connect_headers: HashMap<String, String>,
    ) -> Self {
        let mut defaults: Vec<(String, String)> = connect_headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        defaults.sort();
        let transport = factory.create(uri, connect_headers);
        let mut client = Self::new(transport, ClientOptions::default());
        client.connect_headers = defaults;
        client
    }

    pub fn set_client_heartbeat_ms(&self, ms: u64) {
        self.connection.heartbeat().set_client_send_ms(ms);
    }

    pub fn set_server_heartbeat_ms(&self, ms: u64) {
        self.connection.heartbeat().set_server_watch_ms(ms);
    }

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        self.connection.heartbeat().config()
    }

    pub fn set_match_strategy(&self, strategy: MatchStrategy) {
        self.registry.set_match_strategy(strategy);
    }

    pub fn set_path_matcher(&self, matcher: Arc<dyn PathMatcher>) {
        self.registry.set_path_matcher(matcher);
    }

    /// Connect with extra `CONNECT` headers (login, passcode, host, ...).
    pub async fn connect(&self, headers: Vec<(String, String)>) -> Result<(), ConnError> {
        self.connection.connect(headers).await
    }

    /// Connect with the headers given to [`StompClient::create`].
    pub async fn connect_default(&self) -> Result<(), ConnError> {
        self.connection.connect(self.connect_headers.clone()).await
    }

    pub async fn disconnect(&self) -> Result<(), ConnError> {
        self.connection.disconnect().await
    }

    /// Connect again with the headers of the previous `connect`.
    pub async fn reconnect(&self) -> Result<(), ConnError> {
        self.connection.reconnect().await
    }

    pub async fn send(&self, destination: &str, body: Option<&str>) -> Result<(), ConnError> {
        self.connection.send(destination, body).await
    }

    pub async fn send_frame(&self, frame: Frame) -> Result<(), ConnError> {
        self.connection.send_frame(frame).await
    }

    pub async fn subscribe(
        &self,
        destination: &str,
        headers: Vec<(String, String)>,
    ) -> Result<Subscription, ConnError> {
        self.registry.subscribe(destination, headers).await
    }

    pub async fn unsubscribe(&self, destination: &str) -> Result<bool, ConnError> {
        self.registry.unsubscribe(destination).await
    }

    pub fn subscription_id(&self, destination: &str) -> Option<String> {
        self.registry.subscription_id(destination)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.registry.ids().destinations()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn lifecycle(&self) -> BusStream<LifecycleEvent> {
        self.connection.lifecycle()
    }

    /// Every inbound frame, before destination filtering.
    pub fn messages(&self) -> BusStream<Frame> {
        self.connection.messages()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}
