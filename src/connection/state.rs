//! Lifecycle of one client connection.

/// Connection state.
///
/// `Connecting -> Connected -> Closed`, or `Connecting -> Failed` when
/// establishment does not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// TCP, TLS or the upgrade handshake is in progress.
    #[default]
    Connecting,
    /// The channel is open and text frames may be sent.
    Connected,
    /// Closed locally or by the peer.
    Closed,
    /// Establishment failed.
    Failed,
}

impl ConnectionState {
    /// Returns `true` until the connection has closed or failed.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    /// Returns `true` only for `Connected`.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Closed => write!(f, "Closed"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}
