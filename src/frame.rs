use std::fmt;
use std::str::FromStr;

/// STOMP commands understood by the client.
///
/// `Unknown` is not a wire command: it is what the codec produces for input
/// that carries no command at all, which is how bare heartbeat pings and
/// pongs are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Message,
    Subscribe,
    Unsubscribe,
    Begin,
    Commit,
    Abort,
    Ack,
    Nack,
    Disconnect,
    Receipt,
    Error,
    Unknown,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Message => "MESSAGE",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Unknown => "UNKNOWN",
        }
    }
}

impl FromStr for Command {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cmd = match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "MESSAGE" => Command::Message,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "DISCONNECT" => Command::Disconnect,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return Err(()),
        };
        Ok(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header names the client knows about.
///
/// Decoding resolves every inbound header key against this table; keys that
/// resolve to [`HeaderKey::None`] are not kept on the decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKey {
    AcceptVersion,
    HeartBeat,
    Destination,
    Subscription,
    ContentType,
    ContentLength,
    MessageId,
    Id,
    Ack,
    Host,
    Login,
    Passcode,
    Transaction,
    Receipt,
    ReceiptId,
    Message,
    Session,
    Server,
    Version,
    None,
}

impl HeaderKey {
    const KNOWN: [HeaderKey; 19] = [
        HeaderKey::AcceptVersion,
        HeaderKey::HeartBeat,
        HeaderKey::Destination,
        HeaderKey::Subscription,
        HeaderKey::ContentType,
        HeaderKey::ContentLength,
        HeaderKey::MessageId,
        HeaderKey::Id,
        HeaderKey::Ack,
        HeaderKey::Host,
        HeaderKey::Login,
        HeaderKey::Passcode,
        HeaderKey::Transaction,
        HeaderKey::Receipt,
        HeaderKey::ReceiptId,
        HeaderKey::Message,
        HeaderKey::Session,
        HeaderKey::Server,
        HeaderKey::Version,
    ];

    /// Wire text of the header name. `None` maps to the empty string.
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderKey::AcceptVersion => "accept-version",
            HeaderKey::HeartBeat => "heart-beat",
            HeaderKey::Destination => "destination",
            HeaderKey::Subscription => "subscription",
            HeaderKey::ContentType => "content-type",
            HeaderKey::ContentLength => "content-length",
            HeaderKey::MessageId => "message-id",
            HeaderKey::Id => "id",
            HeaderKey::Ack => "ack",
            HeaderKey::Host => "host",
            HeaderKey::Login => "login",
            HeaderKey::Passcode => "passcode",
            HeaderKey::Transaction => "transaction",
            HeaderKey::Receipt => "receipt",
            HeaderKey::ReceiptId => "receipt-id",
            HeaderKey::Message => "message",
            HeaderKey::Session => "session",
            HeaderKey::Server => "server",
            HeaderKey::Version => "version",
            HeaderKey::None => "",
        }
    }

    /// Resolve raw header text to a known key, or `HeaderKey::None`.
    pub fn from_wire(name: &str) -> HeaderKey {
        Self::KNOWN
            .iter()
            .copied()
            .find(|k| k.as_str() == name)
            .unwrap_or(HeaderKey::None)
    }

    pub fn is_known(&self) -> bool {
        *self != HeaderKey::None
    }
}

impl From<HeaderKey> for String {
    fn from(key: HeaderKey) -> Self {
        key.as_str().to_string()
    }
}

impl fmt::Display for HeaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A simple representation of a STOMP frame.
///
/// `Frame` contains the command, an ordered list of headers (duplicates are
/// allowed; lookups return the first match) and an optional text body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. CONNECT, SEND, SUBSCRIBE)
    pub command: Command,
    /// Ordered headers as (key, value) pairs
    pub headers: Vec<(String, String)>,
    /// Body text, `None` when the frame carries no body
    pub body: Option<String>,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add a header (builder style).
    ///
    /// Parameters
    /// - `key`: header name; a [`HeaderKey`] or any string.
    /// - `value`: header value.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Append several headers in order (builder style).
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the frame body (builder style).
    pub fn set_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Get the value of a header by name.
    ///
    /// Returns the first header value matching the given key (case-sensitive),
    /// or `None` if no such header exists.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Typed variant of [`Frame::get_header`].
    pub fn header_value(&self, key: HeaderKey) -> Option<&str> {
        if !key.is_known() {
            return None;
        }
        self.get_header(key.as_str())
    }

    pub fn destination(&self) -> Option<&str> {
        self.header_value(HeaderKey::Destination)
    }

    /// `SEND` frame for `destination` with an optional body.
    pub fn send(destination: &str, body: Option<&str>) -> Self {
        let frame = Frame::new(Command::Send).header(HeaderKey::Destination, destination);
        match body {
            Some(b) => frame.set_body(b),
            None => frame,
        }
    }

    /// `SUBSCRIBE` frame with `id`, `destination` and `ack:auto`.
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header(HeaderKey::Id, id)
            .header(HeaderKey::Destination, destination)
            .header(HeaderKey::Ack, "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header(HeaderKey::Id, id)
    }

    /// `CONNECT` frame advertising the supported versions and the client's
    /// desired `heart-beat` pair, followed by caller-supplied headers.
    pub fn connect(send_ms: u64, watch_ms: u64, extra: &[(String, String)]) -> Self {
        Frame::new(Command::Connect)
            .header(HeaderKey::AcceptVersion, crate::SUPPORTED_VERSIONS)
            .header(HeaderKey::HeartBeat, format!("{},{}", send_ms, watch_ms))
            .headers(extra.iter().cloned())
    }

    /// The client's bare heart-beat (`"\r\n"`, no command).
    pub fn heartbeat_ping() -> Self {
        Frame::new(Command::Unknown).set_body(crate::heartbeat::HEARTBEAT_PING)
    }

    /// True when the frame is a bare server pong (newline only, no command).
    pub fn is_heartbeat(&self) -> bool {
        self.command == Command::Unknown
            && matches!(self.body.as_deref(), Some("\n") | Some("\r\n"))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(
            f,
            "Body ({} bytes)",
            self.body.as_ref().map(|b| b.len()).unwrap_or(0)
        )
    }
}
