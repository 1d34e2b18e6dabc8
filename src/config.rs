//! Client configuration: target, TLS options, limits and timeouts.

use std::time::Duration;

use crate::error::{Error, Result};

/// Size limits applied to inbound data.
///
/// These bound memory use per client when a misbehaving server sends
/// oversized frames or an endless handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single frame payload in bytes.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of a reassembled message in bytes.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum size of the server's handshake response in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(max_frame_size: usize, max_message_size: usize, max_handshake_size: usize) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_handshake_size,
        }
    }

    /// Validate that frame size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a reassembled message is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<()> {
        if size > self.max_handshake_size {
            Err(Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeouts for the connection establishment phase.
///
/// There is no per-request timeout: a request whose
/// response never arrives stays pending until the connection closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time to open the TCP (and TLS) connection.
    ///
    /// Default: 30 seconds
    pub connect: Duration,

    /// Maximum time for the HTTP upgrade exchange.
    ///
    /// Default: 30 seconds
    pub handshake: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            handshake: Duration::from_secs(30),
        }
    }
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(connect: Duration, handshake: Duration) -> Self {
        Self { connect, handshake }
    }
}

/// TLS options for `wss://` targets.
///
/// Certificate and key are raw PEM bytes; reading them from disk is the
/// caller's job.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// Verify the server certificate chain and name.
    ///
    /// Default: true
    pub reject_unauthorized: bool,

    /// PEM-encoded client private key.
    pub client_key: Option<Vec<u8>>,

    /// PEM-encoded client certificate chain.
    pub client_cert: Option<Vec<u8>>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            reject_unauthorized: true,
            client_key: None,
            client_cert: None,
        }
    }
}

impl TlsOptions {
    /// Options that skip server certificate verification.
    #[must_use]
    pub fn insecure() -> Self {
        Self {
            reject_unauthorized: false,
            ..Self::default()
        }
    }

    /// Present a client certificate and key during the TLS handshake.
    #[must_use]
    pub fn with_client_auth(mut self, cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }
}

impl std::fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsOptions")
            .field("reject_unauthorized", &self.reject_unauthorized)
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .field("client_cert", &self.client_cert.as_ref().map(Vec::len))
            .finish()
    }
}

/// A parsed `ws://` or `wss://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Whether the connection is wrapped in TLS.
    pub secure: bool,
    /// Host name or IP literal (without brackets).
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Request path including any query string.
    pub path: String,
}

impl Target {
    /// Parse a WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the scheme is not `ws`/`wss`, the host
    /// is empty, or the port is not a valid number.
    pub fn parse(url: &str) -> Result<Self> {
        let (secure, rest) = if let Some(rest) = url.strip_prefix("ws://") {
            (false, rest)
        } else if let Some(rest) = url.strip_prefix("wss://") {
            (true, rest)
        } else {
            return Err(Error::InvalidUrl(format!("unsupported scheme in {url}")));
        };

        let (authority, path) = match rest.find(['/', '?']) {
            Some(idx) if rest[idx..].starts_with('?') => (&rest[..idx], format!("/{}", &rest[idx..])),
            Some(idx) => (&rest[..idx], rest[idx..].to_string()),
            None => (rest, "/".to_string()),
        };

        let default_port = if secure { 443 } else { 80 };
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| Error::InvalidUrl(format!("unterminated IPv6 host in {url}")))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(p, url)?,
                None if tail.is_empty() => default_port,
                None => return Err(Error::InvalidUrl(format!("garbage after host in {url}"))),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, p)) => (host, parse_port(p, url)?),
                None => (authority, default_port),
            }
        };

        if host.is_empty() {
            return Err(Error::InvalidUrl(format!("missing host in {url}")));
        }

        Ok(Self {
            secure,
            host: host.to_string(),
            port,
            path,
        })
    }

    /// Value for the HTTP `Host` header.
    #[must_use]
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

fn parse_port(port: &str, url: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| Error::InvalidUrl(format!("invalid port in {url}")))
}

/// Configuration for one load-test client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Target URL (`ws://` or `wss://`).
    pub url: String,

    /// TLS options, used for `wss://` targets only.
    pub tls: TlsOptions,

    /// Resource limits.
    pub limits: Limits,

    /// Connection establishment timeouts.
    ///
    /// If `None`, establishment waits as long as the OS allows.
    /// Default: None
    pub timeouts: Option<Timeouts>,

    /// Read buffer size (in bytes).
    ///
    /// Default: 8 KB (8192)
    pub read_buffer_size: usize,

    /// Write buffer size (in bytes).
    ///
    /// Default: 8 KB (8192)
    pub write_buffer_size: usize,
}

impl ClientConfig {
    /// Create a configuration for the given target with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tls: TlsOptions::default(),
            limits: Limits::default(),
            timeouts: None,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
        }
    }

    /// Set TLS options.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// Disable server certificate verification.
    #[must_use]
    pub fn insecure(mut self) -> Self {
        self.tls.reject_unauthorized = false;
        self
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set establishment timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set write buffer size.
    #[must_use]
    pub const fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Parse the configured URL.
    ///
    /// # Errors
    ///
    /// See [`Target::parse`].
    pub fn target(&self) -> Result<Target> {
        Target::parse(&self.url)
    }
}
