//! Error types for the load-test client.
//!
//! Three layers of failure are kept apart:
//!
//! - [`Error`]: the wire and the connection (URL, I/O, handshake, framing, TLS).
//! - [`DecodeError`]: an inbound frame that is not an application message.
//!   These are logged and dropped, never surfaced to a request.
//! - [`RequestError`]: what a request's completion callback receives.

use thiserror::Error;

/// Result type alias for connection and wire operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while establishing or driving a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The target URL could not be used.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// The server rejected or garbled the upgrade handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake response exceeds configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in a text message.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Reassembled message exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Reserved bits set; no extensions are ever negotiated.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// The peer went away.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// A frame was offered to a connection that is not `Connected`.
    #[error("Not connected")]
    NotConnected,

    /// Connection establishment did not finish in time.
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// TLS setup or negotiation failed.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

/// Why an inbound frame could not be read as an application message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame was not a text frame.
    #[error("Invalid message type {0}")]
    NonText(&'static str),

    /// Text frame did not parse as JSON.
    #[error("Invalid JSON: {0}")]
    Malformed(String),
}

/// Failure reported to a request's completion callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RequestError {
    /// The connection failed while the request was pending.
    #[error("connection error: {0}")]
    Connection(String),

    /// The connection closed while the request was pending.
    #[error("connection closed")]
    Closed,

    /// The client has no message generator, so nothing was sent.
    #[error("no message generator configured")]
    MissingGenerator,

    /// The connection was not established when the request was dispatched.
    #[error("connection not established")]
    NotConnected,

    /// Another request is still awaiting its response.
    #[error("a request is already in flight")]
    InFlight,

    /// The connection has terminated; no further requests are possible.
    #[error("connection terminated")]
    Terminated,
}
