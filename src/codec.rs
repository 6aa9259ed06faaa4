use thiserror::Error;

use crate::frame::{Command, Frame, HeaderKey};

/// Frame terminator.
pub const NUL: char = '\0';

/// Errors produced while decoding inbound wire text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The first line is not a STOMP command
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),
    /// A line inside the header block is not `key:value`
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    /// A header contains a backslash sequence STOMP 1.2 does not define
    #[error("invalid escape in header: {0:?}")]
    InvalidEscape(String),
}

/// Escape a STOMP 1.2 header value for wire transmission.
///
/// - backslash (0x5c) → `\\`
/// - carriage return (0x0d) → `\r`
/// - line feed (0x0a) → `\n`
/// - colon (0x3a) → `\c`
fn escape_header_value(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\c"),
            _ => result.push(ch),
        }
    }
    result
}

/// Reverse of [`escape_header_value`].
fn unescape_header_value(input: &str) -> Result<String, DecodeError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => result.push('\\'),
            Some('r') => result.push('\r'),
            Some('n') => result.push('\n'),
            Some('c') => result.push(':'),
            _ => return Err(DecodeError::InvalidEscape(input.to_string())),
        }
    }
    Ok(result)
}

/// CONNECT and CONNECTED headers are never escaped (STOMP 1.2 backwards
/// compatibility rule).
fn uses_escaping(command: Command) -> bool {
    !matches!(
        command,
        Command::Connect | Command::Stomp | Command::Connected
    )
}

/// Split off the first line; the terminating LF is consumed.
fn split_line(input: &str) -> (&str, &str) {
    match input.find('\n') {
        Some(i) => (&input[..i], &input[i + 1..]),
        None => (input, ""),
    }
}

/// `StompCodec` converts between [`Frame`] values and STOMP wire text.
///
/// The codec is stateless apart from the legacy whitespace flag, which makes
/// [`StompCodec::encode`] pad bodies with two extra newlines for brokers that
/// expect the pre-1.1 layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StompCodec {
    legacy_whitespace: bool,
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_legacy_whitespace(legacy_whitespace: bool) -> Self {
        Self { legacy_whitespace }
    }

    pub fn legacy_whitespace(&self) -> bool {
        self.legacy_whitespace
    }

    /// Encode `frame` into wire text.
    ///
    /// Layout: command line, one `key:value` line per header, a blank line,
    /// the body (if any), `"\n\n"` after the body in legacy mode, and a NUL
    /// terminator. An `Unknown` frame is written as its raw body so pings
    /// survive a round trip.
    pub fn encode(&self, frame: &Frame) -> String {
        if frame.command == Command::Unknown {
            return frame.body.clone().unwrap_or_else(|| "\n".to_string());
        }

        let mut out = String::with_capacity(64 + frame.body.as_ref().map_or(0, |b| b.len()));
        out.push_str(frame.command.as_str());
        out.push('\n');

        let escape = uses_escaping(frame.command);
        for (k, v) in &frame.headers {
            if escape {
                out.push_str(&escape_header_value(k));
                out.push(':');
                out.push_str(&escape_header_value(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }

        out.push('\n');
        if let Some(body) = &frame.body {
            out.push_str(body);
            if self.legacy_whitespace {
                out.push_str("\n\n");
            }
        }
        out.push(NUL);
        out
    }

    /// Decode wire text into a [`Frame`].
    ///
    /// Whitespace-only input yields an `Unknown` frame whose body is the
    /// original text; this is how heartbeats are represented. Header keys not
    /// found in [`HeaderKey`] are dropped.
    pub fn decode(&self, text: &str) -> Result<Frame, DecodeError> {
        if text.trim().is_empty() {
            return Ok(Frame {
                command: Command::Unknown,
                headers: Vec::new(),
                body: Some(text.to_string()),
            });
        }

        // heartbeats glued in front of a frame
        let input = text.trim_start_matches(['\r', '\n']);

        let (command_line, mut rest) = split_line(input);
        let token = command_line.trim_end_matches(['\r', NUL]).trim();
        let command: Command = token
            .parse()
            .map_err(|_| DecodeError::UnknownCommand(token.to_string()))?;
        let escape = uses_escaping(command);

        let mut frame = Frame::new(command);
        let mut body_section: Option<&str> = None;
        while !rest.is_empty() {
            let (raw_line, tail) = split_line(rest);
            rest = tail;
            let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
            if line.is_empty() {
                body_section = Some(rest);
                break;
            }
            if line.starts_with(NUL) {
                break;
            }

            let (raw_key, raw_value) = line
                .split_once(':')
                .ok_or_else(|| DecodeError::MalformedHeader(line.to_string()))?;
            if raw_key.is_empty() || raw_key.contains(char::is_whitespace) {
                return Err(DecodeError::MalformedHeader(line.to_string()));
            }
            let (key, value) = if escape {
                (
                    unescape_header_value(raw_key)?,
                    unescape_header_value(raw_value)?,
                )
            } else {
                (raw_key.to_string(), raw_value.to_string())
            };

            if HeaderKey::from_wire(&key).is_known() {
                frame.headers.push((key, value));
            } else {
                tracing::trace!(header = %key, command = %command, "dropping unknown header");
            }
        }

        if let Some(section) = body_section {
            let body = match section.find(NUL) {
                Some(end) => &section[..end],
                None => section,
            };
            if !body.is_empty() {
                frame.body = Some(body.to_string());
            }
        }

        Ok(frame)
    }
}
