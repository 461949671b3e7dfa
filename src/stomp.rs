//! Minimal STOMP 1.2 frame codec.
//!
//! The dashboard backend publishes on a STOMP broker reached over a plain
//! WebSocket. Only the frames a read-only subscriber needs are modelled:
//! `CONNECT`, `SUBSCRIBE`, `UNSUBSCRIBE`, `DISCONNECT` going out and
//! `CONNECTED`, `MESSAGE`, `RECEIPT`, `ERROR` coming in.
//!
//! Wire format: `COMMAND\n` + `key:value\n` headers + `\n` + body + `\0`.
//! Header values escape `\\`, `\n`, `\r` and `:`; bare EOLs between frames
//! are heart-beats.

use std::fmt;

use crate::error::{Result, StreamError};

/// STOMP commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order. On repeats the first occurrence wins.
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

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `CONNECT` for STOMP 1.2, heart-beats disabled.
    pub fn connect(host: &str) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0")
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header("id", id)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// Serialize to the text form sent in one WebSocket message.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(32 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        // CONNECT headers are never escaped (STOMP 1.2 §Value Encoding).
        let escape = self.command != Command::Connect;
        for (k, v) in &self.headers {
            if escape {
                out.push_str(&escape_header(k));
                out.push(':');
                out.push_str(&escape_header(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode every frame in one WebSocket text message.
    ///
    /// Leading EOLs (heart-beats) are skipped. A message made only of
    /// heart-beats yields an empty vector.
    pub fn decode_all(raw: &str) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        let mut rest = raw;
        loop {
            rest = rest.trim_start_matches(|c: char| c == '\n' || c == '\r');
            if rest.is_empty() {
                break;
            }
            let (frame, consumed) = decode_one(rest)?;
            frames.push(frame);
            rest = &rest[consumed..];
        }
        Ok(frames)
    }
}

fn decode_one(raw: &str) -> Result<(Frame, usize)> {
    let head_end = raw
        .find("\n\n")
        .map(|i| (i, 2))
        .into_iter()
        .chain(raw.find("\r\n\r\n").map(|i| (i, 4)))
        .min_by_key(|(i, _)| *i)
        .ok_or_else(|| StreamError::Protocol("frame without header terminator".into()))?;
    let (head, sep_len) = (&raw[..head_end.0], head_end.1);
    let body_start = head_end.0 + sep_len;

    let mut lines = head.lines();
    let command_line = lines
        .next()
        .map(str::trim_end)
        .ok_or_else(|| StreamError::Protocol("empty frame".into()))?;
    let command = Command::parse(command_line)
        .ok_or_else(|| StreamError::Protocol(format!("unknown command {command_line:?}")))?;

    let mut frame = Frame::new(command);
    for line in lines {
        let line = line.trim_end_matches('\r');
        let (k, v) = line
            .split_once(':')
            .ok_or_else(|| StreamError::Protocol(format!("malformed header {line:?}")))?;
        frame.headers.push((unescape_header(k)?, unescape_header(v)?));
    }

    let rest = &raw[body_start..];
    let body_len = match frame.get("content-length") {
        Some(len) => {
            let len: usize = len
                .trim()
                .parse()
                .map_err(|_| StreamError::Protocol(format!("bad content-length {len:?}")))?;
            if rest.len() < len || !rest.is_char_boundary(len) {
                return Err(StreamError::Protocol("truncated frame body".into()));
            }
            len
        }
        None => rest
            .find('\0')
            .ok_or_else(|| StreamError::Protocol("frame without NUL terminator".into()))?,
    };
    frame.body = rest[..body_len].to_string();

    let after_body = &rest[body_len..];
    if !after_body.starts_with('\0') {
        return Err(StreamError::Protocol("frame without NUL terminator".into()));
    }
    Ok((frame, body_start + body_len + 1))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
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
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(StreamError::Protocol(format!(
                    "invalid header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_frame_encoding() {
        let wire = Frame::connect("localhost").encode();
        assert!(wire.starts_with("CONNECT\n"));
        assert!(wire.contains("accept-version:1.2\n"));
        assert!(wire.contains("host:localhost\n"));
        assert!(wire.ends_with("\n\n\0"));
    }

    #[test]
    fn subscribe_frame_encoding() {
        let wire = Frame::subscribe("sub-0", "/topic/metrics/42").encode();
        assert_eq!(
            wire,
            "SUBSCRIBE\nid:sub-0\ndestination:/topic/metrics/42\nack:auto\n\n\0"
        );
    }

    #[test]
    fn decode_message_with_json_body() {
        let raw = "MESSAGE\ndestination:/topic/metrics/1\nsubscription:sub-0\nmessage-id:7\n\n{\"timestamp\":1}\0";
        let frames = Frame::decode_all(raw).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Message);
        assert_eq!(frames[0].get("subscription"), Some("sub-0"));
        assert_eq!(frames[0].body, "{\"timestamp\":1}");
    }

    #[test]
    fn decode_honours_content_length() {
        let raw = "MESSAGE\ncontent-length:5\n\nab\0de\0";
        let frames = Frame::decode_all(raw).unwrap();
        assert_eq!(frames[0].body, "ab\0de");
    }

    #[test]
    fn decode_skips_heartbeats_and_reads_several_frames() {
        let raw = "\n\nCONNECTED\nversion:1.2\n\n\0\nRECEIPT\nreceipt-id:1\n\n\0";
        let frames = Frame::decode_all(raw).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(frames[1].get("receipt-id"), Some("1"));
    }

    #[test]
    fn heartbeat_only_is_empty() {
        assert!(Frame::decode_all("\n").unwrap().is_empty());
    }

    #[test]
    fn header_escapes_roundtrip() {
        let frame = Frame::new(Command::Message).header("x", "a:b\nc\\d");
        let wire = frame.encode();
        assert!(wire.contains("x:a\\cb\\nc\\\\d\n"));
        let back = Frame::decode_all(&wire).unwrap();
        assert_eq!(back[0].get("x"), Some("a:b\nc\\d"));
    }

    #[test]
    fn crlf_frames_decode() {
        let raw = "ERROR\r\nmessage:boom\r\n\r\nbad things\0";
        let frames = Frame::decode_all(raw).unwrap();
        assert_eq!(frames[0].command, Command::Error);
        assert_eq!(frames[0].get("message"), Some("boom"));
        assert_eq!(frames[0].body, "bad things");
    }

    #[test]
    fn unknown_command_is_protocol_error() {
        let err = Frame::decode_all("BOGUS\n\n\0").unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
    }

    #[test]
    fn missing_nul_is_protocol_error() {
        assert!(Frame::decode_all("MESSAGE\n\nbody").is_err());
    }

    #[test]
    fn first_repeated_header_wins() {
        let frames = Frame::decode_all("MESSAGE\nfoo:1\nfoo:2\n\n\0").unwrap();
        assert_eq!(frames[0].get("foo"), Some("1"));
    }
}
