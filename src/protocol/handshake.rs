//! Client side of the HTTP/1.1 upgrade handshake (RFC 6455 section 4.1).

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

use crate::config::Target;
use crate::error::{Error, Result};

/// The GUID appended to the key in the Sec-WebSocket-Accept calculation.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the Sec-WebSocket-Accept value for a Sec-WebSocket-Key.
///
/// ```
/// use wsload::protocol::handshake::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a random, base64-encoded 16-byte Sec-WebSocket-Key.
///
/// # Errors
///
/// Returns `Error::Io` if the OS random source is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| Error::Io(format!("random source unavailable: {e}")))?;
    Ok(BASE64.encode(nonce))
}

/// Offset just past the `\r\n\r\n` that ends an HTTP head, if present.
#[must_use]
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Upgrade request sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Value of the Host header.
    pub host: String,
    /// Request target (path and query).
    pub path: String,
    /// The Sec-WebSocket-Key this request carries.
    pub key: String,
}

impl HandshakeRequest {
    /// Build a request for `target` with a fresh random key.
    ///
    /// # Errors
    ///
    /// See [`generate_key`].
    pub fn new(target: &Target) -> Result<Self> {
        Ok(Self::with_key(target, generate_key()?))
    }

    /// Build a request with a caller-chosen key.
    #[must_use]
    pub fn with_key(target: &Target, key: impl Into<String>) -> Self {
        Self {
            host: target.host_header(),
            path: target.path.clone(),
            key: key.into(),
        }
    }

    /// Serialize the request head.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            self.path, self.host, self.key
        )
        .into_bytes()
    }

    /// Check a server response against this request.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` if the response is malformed or its
    /// Sec-WebSocket-Accept does not match this request's key.
    pub fn verify(&self, response: &[u8]) -> Result<HandshakeResponse> {
        let response = HandshakeResponse::parse(response)?;
        let expected = compute_accept_key(&self.key);
        if response.accept != expected {
            return Err(Error::InvalidHandshake(format!(
                "Sec-WebSocket-Accept mismatch: expected {}, got {}",
                expected, response.accept
            )));
        }
        Ok(response)
    }
}

/// Upgrade response from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
    /// The selected Sec-WebSocket-Protocol, if any.
    pub protocol: Option<String>,
}

impl HandshakeResponse {
    /// Parse a response head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The data is not valid UTF-8 or is empty.
    /// - The status is not `101`.
    /// - `Upgrade`, `Connection` or `Sec-WebSocket-Accept` is missing or wrong.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let status_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;
        let mut status = status_line.split_whitespace();
        let version = status.next().unwrap_or_default();
        let code = status.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.1") || code != "101" {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {}",
                status_line
            )));
        }

        let headers: HashMap<String, String> = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        let upgrade = headers
            .get("upgrade")
            .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header in response".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Upgrade header: {}",
                upgrade
            )));
        }

        let connection = headers.get("connection").ok_or_else(|| {
            Error::InvalidHandshake("Missing Connection header in response".into())
        })?;
        if !connection.to_ascii_lowercase().contains("upgrade") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Connection header: {}",
                connection
            )));
        }

        let accept = headers
            .get("sec-websocket-accept")
            .cloned()
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?;

        Ok(Self {
            accept,
            protocol: headers.get("sec-websocket-protocol").cloned(),
        })
    }
}
