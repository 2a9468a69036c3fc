//! Protocol module
//!
//! This module defines the STOMP 1.2 wire format spoken with the chat broker:
//! - Frame commands and the frame structure
//! - Frame encoding with header escaping
//! - Incremental decoding of buffered broker input (heart-beats skipped)
//! - Constructors for the frames the client sends

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// STOMP protocol version negotiated with the broker
pub const STOMP_VERSION: &str = "1.2";

/// Largest frame body the decoder buffers (1 MiB)
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// STOMP frame commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake
    Connect,
    /// Alternative client handshake
    Stomp,
    /// Broker accepted the handshake
    Connected,
    /// Publish to a destination
    Send,
    /// Register interest in a destination
    Subscribe,
    /// Drop a subscription
    Unsubscribe,
    /// Graceful shutdown
    Disconnect,
    /// Broker delivery for a subscription
    Message,
    /// Broker acknowledgment of a receipt request
    Receipt,
    /// Broker-side failure
    Error,
    /// Acknowledge a message
    Ack,
    /// Reject a message
    Nack,
    /// Start a transaction
    Begin,
    /// Commit a transaction
    Commit,
    /// Roll back a transaction
    Abort,
}

impl Command {
    /// Wire representation of the command
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
        }
    }

    /// Handshake frames carry their headers unescaped
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let command = match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            other => return Err(Error::Protocol(format!("Unknown command: {}", other))),
        };
        Ok(command)
    }
}

/// A single STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command
    pub command: Command,
    /// Headers in wire order; repeated names keep the first value significant
    pub headers: Vec<(String, String)>,
    /// Frame body (UTF-8 text; chat payloads are JSON)
    pub body: String,
}

impl Frame {
    /// Create an empty frame for a command
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header (builder style)
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body (builder style)
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header; the first occurrence wins
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Handshake frame authenticated with a bearer token
    pub fn connect(host: &str, token: &str, heartbeat_ms: u64) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", STOMP_VERSION)
            .header("host", host)
            .header("heart-beat", format!("{},{}", heartbeat_ms, heartbeat_ms))
            .header("Authorization", format!("Bearer {}", token))
    }

    /// Subscription to a destination under the given id
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    /// Cancel the subscription with the given id
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    /// JSON publish to a destination
    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        Self::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(body)
    }

    /// Graceful disconnect
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Human-readable reason carried by an ERROR frame
    pub fn error_reason(&self) -> String {
        match self.get_header("message") {
            Some(message) => message.to_string(),
            None if !self.body.is_empty() => self.body.trim().to_string(),
            None => "unspecified broker error".to_string(),
        }
    }

    /// Encode the frame to its wire form (NUL-terminated)
    pub fn encode(&self) -> String {
        let escape_headers = self.command.escapes_headers();
        let mut out = String::with_capacity(32 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape_headers {
                out.push_str(&escape(name));
                out.push(':');
                out.push_str(&escape(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !self.body.is_empty() && self.get_header("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode exactly one complete frame
    pub fn decode(input: &str) -> Result<Self> {
        let mut decoder = FrameDecoder::new();
        decoder.push(input);
        decoder
            .next_frame()?
            .ok_or_else(|| Error::Protocol("Incomplete frame".to_string()))
    }
}

/// Incremental frame decoder over buffered text
///
/// Broker input may split or batch frames arbitrarily; push whatever arrives
/// and pull complete frames until `next_frame` returns `Ok(None)`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received text
    pub fn push(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// Bytes waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pull the next complete frame, if any
    ///
    /// On a malformed frame the offending bytes are discarded before the
    /// error is returned, so the decoder can keep going.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.skip_heartbeats();
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let Some((head_end, body_start)) = find_head_end(&self.buffer) else {
            return Ok(None);
        };

        let head = match parse_head(&self.buffer[..head_end]) {
            Ok(head) => head,
            Err(e) => {
                self.discard_through_nul();
                return Err(e);
            }
        };
        let (command, headers) = head;

        let content_length = headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .map(|(_, value)| value.trim().parse::<usize>());

        let body_end = match content_length {
            Some(Ok(length)) if length > MAX_BODY_SIZE => {
                self.discard_through_nul();
                return Err(Error::Protocol(format!(
                    "content-length {} exceeds the {} byte limit",
                    length, MAX_BODY_SIZE
                )));
            }
            Some(Ok(length)) => {
                let end = body_start.saturating_add(length);
                if self.buffer.len() <= end {
                    return Ok(None);
                }
                if self.buffer.as_bytes()[end] != 0 || !self.buffer.is_char_boundary(end) {
                    self.discard_through_nul();
                    return Err(Error::Protocol(format!(
                        "{} frame body does not match content-length {}",
                        command, length
                    )));
                }
                end
            }
            Some(Err(_)) => {
                self.discard_through_nul();
                return Err(Error::Protocol("Invalid content-length header".to_string()));
            }
            None => match self.buffer[body_start..].find('\0') {
                Some(offset) => body_start + offset,
                None if self.buffer.len() - body_start > MAX_BODY_SIZE => {
                    self.buffer.clear();
                    return Err(Error::Protocol(format!(
                        "{} frame body exceeds the {} byte limit",
                        command, MAX_BODY_SIZE
                    )));
                }
                None => return Ok(None),
            },
        };

        let body = self.buffer[body_start..body_end].to_string();
        self.buffer.drain(..=body_end);

        Ok(Some(Frame {
            command,
            headers,
            body,
        }))
    }

    fn skip_heartbeats(&mut self) {
        let trimmed = self.buffer.len() - self.buffer.trim_start_matches(['\n', '\r']).len();
        if trimmed > 0 {
            self.buffer.drain(..trimmed);
        }
    }

    fn discard_through_nul(&mut self) {
        match self.buffer.find('\0') {
            Some(index) => {
                self.buffer.drain(..=index);
            }
            None => self.buffer.clear(),
        }
    }
}

/// Locate the blank line ending the headers.
/// Returns (end of header block, start of body).
fn find_head_end(buffer: &str) -> Option<(usize, usize)> {
    let mut line_start = 0;
    while let Some(offset) = buffer[line_start..].find('\n') {
        let line_end = line_start + offset;
        let line = buffer[line_start..line_end].trim_end_matches('\r');
        if line.is_empty() && line_start > 0 {
            return Some((line_start, line_end + 1));
        }
        line_start = line_end + 1;
    }
    None
}

fn parse_head(head: &str) -> Result<(Command, Vec<(String, String)>)> {
    let mut lines = head.lines().map(|line| line.trim_end_matches('\r'));
    let command: Command = lines
        .next()
        .ok_or_else(|| Error::Protocol("Missing command line".to_string()))?
        .parse()?;

    let unescape_headers = command.escapes_headers();
    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::Protocol(format!("Malformed header line: {}", line)))?;
        if unescape_headers {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    Ok((command, headers))
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => {
                return Err(Error::Protocol(format!("Undefined header escape: \\{}", other)));
            }
            None => return Err(Error::Protocol("Dangling escape in header".to_string())),
        }
    }
    Ok(out)
}
