//! Console channel message definitions.
//!
//! The console channel carries JSON text frames. The client speaks first with
//! a bare [`Handshake`] object, then sends tagged [`ClientMessage`]s. The
//! server streams tagged [`ServerMessage`]s, but anything it sends that does
//! not parse as one is still shown to the operator as raw text, so decoding an
//! inbound frame never fails (see [`decode_line`]).

use serde::{Deserialize, Serialize};

/// Prefix prepended to server-reported errors when they are displayed.
pub const ERROR_LINE_PREFIX: &str = "[error] ";

/// First message on every channel: authenticates the connection.
///
/// The credential travels in the message body rather than in the URL so it
/// never shows up in proxy or access logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Short-lived bearer credential from the session provider.
    pub token: String,
}

impl Handshake {
    /// Creates a handshake carrying the given credential.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Serializes the handshake to its JSON wire form.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages sent from the console client to the server after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// A line command for the game server process.
    Command {
        /// The trimmed command text.
        cmd: String,
    },
}

impl ClientMessage {
    /// Builds a command message.
    pub fn command(cmd: impl Into<String>) -> Self {
        ClientMessage::Command { cmd: cmd.into() }
    }

    /// Serializes the message to its JSON wire form.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages streamed from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// One line of process output.
    Log { line: String },
    /// A server-side error report.
    Error { message: String },
}

impl ServerMessage {
    /// Returns the display text for this message.
    pub fn into_line(self) -> String {
        match self {
            ServerMessage::Log { line } => line,
            ServerMessage::Error { message } => format!("{}{}", ERROR_LINE_PREFIX, message),
        }
    }
}

/// Decodes a raw inbound frame into the line that should be displayed.
///
/// Frames that are not a recognized [`ServerMessage`] (unknown tags, missing
/// or mistyped fields, plain text) come back verbatim.
pub fn decode_line(raw: &str) -> String {
    match serde_json::from_str::<ServerMessage>(raw) {
        Ok(message) => message.into_line(),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_wire_format() {
        let json = Handshake::new("jwt-abc").to_json().unwrap();
        assert_eq!(json, r#"{"token":"jwt-abc"}"#);
    }

    #[test]
    fn test_command_wire_format() {
        let json = ClientMessage::command("say hi").to_json().unwrap();
        assert_eq!(json, r#"{"type":"command","cmd":"say hi"}"#);
    }

    #[test]
    fn test_decode_log_line() {
        let line = decode_line(r#"{"type":"log","line":"[12:00:01] [Server thread/INFO]: Done (3.2s)!"}"#);
        assert_eq!(line, "[12:00:01] [Server thread/INFO]: Done (3.2s)!");
    }

    #[test]
    fn test_decode_error_message() {
        let line = decode_line(r#"{"type":"error","message":"container not running"}"#);
        assert_eq!(line, "[error] container not running");
    }

    #[test]
    fn test_decode_unknown_tag_is_raw() {
        let raw = r#"{"type":"stats","cpu":12.5}"#;
        assert_eq!(decode_line(raw), raw);
    }

    #[test]
    fn test_decode_missing_field_is_raw() {
        let raw = r#"{"type":"log"}"#;
        assert_eq!(decode_line(raw), raw);
    }

    #[test]
    fn test_decode_wrong_field_type_is_raw() {
        let raw = r#"{"type":"log","line":42}"#;
        assert_eq!(decode_line(raw), raw);
    }

    #[test]
    fn test_decode_plain_text_is_raw() {
        assert_eq!(decode_line("not json at all"), "not json at all");
        assert_eq!(decode_line(""), "");
    }

    #[test]
    fn test_server_message_extra_fields_ignored() {
        let line = decode_line(r#"{"type":"log","line":"hello","ts":1712345678}"#);
        assert_eq!(line, "hello");
    }
}
