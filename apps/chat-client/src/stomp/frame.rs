//! STOMP 1.2 text-frame codec.
//!
//! A frame is `COMMAND`, a newline, zero or more `name:value` header
//! lines, a blank line, then the body, terminated by a NUL octet. A lone
//! EOL between frames is a heartbeat; [`is_heartbeat`] recognizes it so
//! callers never hand one to [`Frame::parse`].

use crate::error::{ChatClientError, Result};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Command> {
        Some(match s {
            "CONNECT" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        })
    }

    /// CONNECT and CONNECTED frames are exempt from header octet escaping.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First header with the given name, per the STOMP repeated-header rule.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    // -- frames the client emits -------------------------------------------

    pub fn connect(host: &str, heartbeat_outgoing_ms: u64, heartbeat_incoming_ms: u64) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header(
                "heart-beat",
                &format!("{heartbeat_outgoing_ms},{heartbeat_incoming_ms}"),
            )
    }

    pub fn subscribe(id: u64, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", &format!("sub-{id}"))
            .header("destination", destination)
    }

    pub fn unsubscribe(id: u64) -> Self {
        Frame::new(Command::Unsubscribe).header("id", &format!("sub-{id}"))
    }

    pub fn send(destination: &str, body: String) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .header("content-length", &body.len().to_string())
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    // -- codec --------------------------------------------------------------

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    pub fn parse(text: &str) -> Result<Frame> {
        let (head, body) = text
            .split_once("\n\n")
            .ok_or_else(|| ChatClientError::Protocol("frame missing header terminator".into()))?;

        let mut lines = head.lines().map(|l| l.trim_end_matches('\r'));
        let command_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| ChatClientError::Protocol("frame missing command".into()))?;
        let command = Command::parse(command_line).ok_or_else(|| {
            ChatClientError::Protocol(format!("unknown STOMP command: {command_line}"))
        })?;

        let unescape_needed = command.escapes_headers();
        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                ChatClientError::Protocol(format!("malformed header line: {line}"))
            })?;
            if unescape_needed {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let body = body
            .strip_suffix('\0')
            .or_else(|| body.split_once('\0').map(|(b, _)| b))
            .unwrap_or(body)
            .to_string();

        Ok(Frame {
            command,
            headers,
            body,
        })
    }
}

/// True when the payload is a bare heartbeat EOL rather than a frame.
pub fn is_heartbeat(text: &str) -> bool {
    text.trim_matches(|c| c == '\n' || c == '\r' || c == '\0').is_empty()
}

/// Parse a `heart-beat` header value (`"sx,sy"` in milliseconds).
pub fn parse_heart_beat(value: &str) -> Option<(u64, u64)> {
    let (sx, sy) = value.split_once(',')?;
    Some((sx.trim().parse().ok()?, sy.trim().parse().ok()?))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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

fn unescape_header(s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
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
            other => {
                return Err(ChatClientError::Protocol(format!(
                    "invalid header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}
