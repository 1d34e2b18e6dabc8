//! Application messages: outbound payloads, inbound frames, and the JSON
//! codec between them.

use serde_json::Value;

use crate::error::DecodeError;

/// Tag of the notice some servers emit right after the channel opens.
pub const HANDSHAKE_NOTICE_TAG: &str = "client_connected";

/// An outbound request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Ready-made text, sent as-is.
    Text(String),
    /// A structured value, serialized to JSON before sending.
    Json(Value),
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

/// A complete data message received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A text message (UTF-8).
    Text(String),
    /// A binary message.
    Binary(Vec<u8>),
}

impl InboundFrame {
    /// Frame kind as used in log lines.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Text(_) => "utf8",
            InboundFrame::Binary(_) => "binary",
        }
    }
}

/// Converts between payloads and the text frames on the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl MessageCodec {
    /// Wire text for a payload: JSON values are serialized, text passes
    /// through unchanged.
    #[must_use]
    pub fn encode(payload: Payload) -> String {
        match payload {
            Payload::Text(text) => text,
            Payload::Json(value) => value.to_string(),
        }
    }

    /// Parse an inbound frame as JSON.
    ///
    /// # Errors
    ///
    /// - `DecodeError::NonText` for binary frames
    /// - `DecodeError::Malformed` when the text is not valid JSON
    pub fn decode(frame: &InboundFrame) -> Result<Value, DecodeError> {
        match frame {
            InboundFrame::Text(text) => {
                serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))
            }
            InboundFrame::Binary(_) => Err(DecodeError::NonText(frame.kind())),
        }
    }

    /// True for `[["client_connected", ...], ...]`.
    #[must_use]
    pub fn is_handshake_notice(message: &Value) -> bool {
        message
            .get(0)
            .and_then(|first| first.get(0))
            .and_then(Value::as_str)
            == Some(HANDSHAKE_NOTICE_TAG)
    }
}
