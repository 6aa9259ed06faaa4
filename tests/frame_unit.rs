//! Unit tests for Frame construction, header lookup and display.

use stompflow::{Command, Frame, HeaderKey, SUPPORTED_VERSIONS};

// =============================================================================
// Command tests
// =============================================================================

#[test]
fn command_parses_wire_names() {
    assert_eq!("MESSAGE".parse::<Command>(), Ok(Command::Message));
    assert_eq!("RECEIPT".parse::<Command>(), Ok(Command::Receipt));
    assert_eq!("STOMP".parse::<Command>(), Ok(Command::Stomp));
}

#[test]
fn command_rejects_lowercase_and_unknown() {
    assert!("message".parse::<Command>().is_err());
    assert!("PUBLISH".parse::<Command>().is_err());
    // UNKNOWN is never a wire command
    assert!("UNKNOWN".parse::<Command>().is_err());
}

#[test]
fn command_display_matches_as_str() {
    assert_eq!(Command::Unsubscribe.to_string(), "UNSUBSCRIBE");
    assert_eq!(Command::Nack.as_str(), "NACK");
}

// =============================================================================
// HeaderKey tests
// =============================================================================

#[test]
fn header_key_from_wire() {
    assert_eq!(HeaderKey::from_wire("heart-beat"), HeaderKey::HeartBeat);
    assert_eq!(HeaderKey::from_wire("receipt-id"), HeaderKey::ReceiptId);
    assert_eq!(HeaderKey::from_wire("x-custom"), HeaderKey::None);
    assert_eq!(HeaderKey::from_wire(""), HeaderKey::None);
}

#[test]
fn header_key_into_string() {
    let s: String = HeaderKey::ContentType.into();
    assert_eq!(s, "content-type");
    assert!(!HeaderKey::None.is_known());
}

// =============================================================================
// Frame builder and lookup tests
// =============================================================================

#[test]
fn builder_keeps_header_order() {
    let frame = Frame::new(Command::Send)
        .header(HeaderKey::Destination, "/queue/a")
        .header("content-type", "text/plain")
        .set_body("hi");
    assert_eq!(
        frame.headers,
        vec![
            ("destination".to_string(), "/queue/a".to_string()),
            ("content-type".to_string(), "text/plain".to_string()),
        ]
    );
    assert_eq!(frame.body.as_deref(), Some("hi"));
}

#[test]
fn get_header_returns_first_match() {
    let frame = Frame::new(Command::Message)
        .header("destination", "/first")
        .header("destination", "/second");
    assert_eq!(frame.get_header("destination"), Some("/first"));
    assert_eq!(frame.destination(), Some("/first"));
}

#[test]
fn header_value_none_key_is_absent() {
    let frame = Frame::new(Command::Message).header("", "empty-key");
    assert_eq!(frame.header_value(HeaderKey::None), None);
    assert_eq!(frame.get_header(""), Some("empty-key"));
}

#[test]
fn send_frame_without_body() {
    let frame = Frame::send("/queue/a", None);
    assert_eq!(frame.command, Command::Send);
    assert_eq!(frame.destination(), Some("/queue/a"));
    assert!(frame.body.is_none());
}

#[test]
fn subscribe_frame_uses_auto_ack() {
    let frame = Frame::subscribe("sub-1", "/topic/a");
    assert_eq!(frame.header_value(HeaderKey::Id), Some("sub-1"));
    assert_eq!(frame.header_value(HeaderKey::Destination), Some("/topic/a"));
    assert_eq!(frame.header_value(HeaderKey::Ack), Some("auto"));
}

#[test]
fn unsubscribe_frame_carries_id() {
    let frame = Frame::unsubscribe("sub-1");
    assert_eq!(frame.command, Command::Unsubscribe);
    assert_eq!(frame.headers, vec![("id".to_string(), "sub-1".to_string())]);
}

#[test]
fn connect_frame_headers() {
    let extra = vec![
        ("login".to_string(), "guest".to_string()),
        ("passcode".to_string(), "secret".to_string()),
    ];
    let frame = Frame::connect(1000, 2000, &extra);
    assert_eq!(frame.command, Command::Connect);
    assert_eq!(frame.header_value(HeaderKey::AcceptVersion), Some(SUPPORTED_VERSIONS));
    assert_eq!(frame.header_value(HeaderKey::HeartBeat), Some("1000,2000"));
    assert_eq!(frame.header_value(HeaderKey::Login), Some("guest"));
    assert_eq!(frame.headers.len(), 4);
}

#[test]
fn heartbeat_ping_is_bare_crlf() {
    let ping = Frame::heartbeat_ping();
    assert_eq!(ping.command, Command::Unknown);
    assert_eq!(ping.body.as_deref(), Some("\r\n"));
    assert!(ping.is_heartbeat());
}

#[test]
fn only_newline_bodies_are_heartbeats() {
    let lf = Frame::new(Command::Unknown).set_body("\n");
    let spaces = Frame::new(Command::Unknown).set_body("   ");
    let message = Frame::new(Command::Message).set_body("\n");
    assert!(lf.is_heartbeat());
    assert!(!spaces.is_heartbeat());
    assert!(!message.is_heartbeat());
}

#[test]
fn display_lists_headers_and_body_size() {
    let frame = Frame::new(Command::Message)
        .header("destination", "/topic/a")
        .set_body("abc");
    let s = frame.to_string();
    assert!(s.starts_with("Command: MESSAGE\n"));
    assert!(s.contains("destination: /topic/a\n"));
    assert!(s.contains("Body (3 bytes)"));
}
