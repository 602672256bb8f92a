// STOMP 1.2 text frame codec.
//
// A frame is `COMMAND\n(header:value\n)*\nbody\0`. Bare EOLs between
// frames are heart-beats. Header values are escaped on every command
// except CONNECT and CONNECTED.

use std::fmt;
use std::str::FromStr;

pub const STOMP_VERSION: &str = "1.2";

const NUL: char = '\0';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
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
    pub const fn as_str(self) -> &'static str {
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
        }
    }

    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
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
            other => return Err(StompError::UnknownCommand(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StompError {
    #[error("unknown STOMP command `{0}`")]
    UnknownCommand(String),
    #[error("STOMP header line `{0}` has no `:` separator")]
    MalformedHeader(String),
    #[error("invalid escape sequence `\\{0}` in STOMP header")]
    InvalidEscape(char),
    #[error("STOMP frame is not terminated by NUL")]
    Unterminated,
    #[error("STOMP frame has no header terminator")]
    MissingHeaderTerminator,
    #[error("invalid content-length `{0}`")]
    InvalidContentLength(String),
}

/// One STOMP frame. Headers keep their wire order; repeated headers
/// resolve to the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: String::new() }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        let escape = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }
}

/// Decode every frame in one transport message. Heart-beat EOLs yield no
/// frames.
pub fn decode_frames(input: &str) -> Result<Vec<Frame>, StompError> {
    let mut frames = Vec::new();
    let mut rest = input;
    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return Ok(frames);
        }
        let (frame, remaining) = decode_one(rest)?;
        frames.push(frame);
        rest = remaining;
    }
}

fn decode_one(input: &str) -> Result<(Frame, &str), StompError> {
    let (head, after_head) = split_head(input)?;
    let mut lines = head.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

    let command: Command = lines.next().unwrap_or_default().parse()?;
    let unescape_headers = command.escapes_headers();

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) =
            line.split_once(':').ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
        if unescape_headers {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value.trim().parse::<usize>().map_err(|_| StompError::InvalidContentLength(value.clone()))
        })
        .transpose()?;

    let (body, remaining) = match content_length {
        Some(len) => {
            let body = after_head.get(..len).ok_or(StompError::Unterminated)?;
            let tail = &after_head[len..];
            let remaining = tail.strip_prefix(NUL).ok_or(StompError::Unterminated)?;
            (body, remaining)
        }
        None => {
            let end = after_head.find(NUL).ok_or(StompError::Unterminated)?;
            (&after_head[..end], &after_head[end + 1..])
        }
    };

    Ok((Frame { command, headers, body: body.to_string() }, remaining))
}

/// Split at the blank line ending the headers, accepting LF or CRLF.
fn split_head(input: &str) -> Result<(&str, &str), StompError> {
    let lf = input.find("\n\n").map(|at| (at, 2));
    let crlf = input.find("\r\n\r\n").map(|at| (at, 4));
    let (at, skip) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 < b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return Err(StompError::MissingHeaderTerminator),
    };
    Ok((&input[..at], &input[at + skip..]))
}

fn push_escaped(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(value: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => return Err(StompError::InvalidEscape(other)),
            None => return Err(StompError::InvalidEscape(' ')),
        }
    }
    Ok(out)
}
