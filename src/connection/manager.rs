use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::state::ConnectionState;
use super::stream::MaybeTlsStream;
use crate::codec::{FrameReader, FrameWriter};
use crate::config::{ClientConfig, Limits, Target};
use crate::error::{Error, Result};
use crate::lifecycle::ClientId;
use crate::message::InboundFrame;
use crate::protocol::handshake::find_head_end;
use crate::protocol::{Frame, HandshakeRequest, OpCode};

/// Status code sent when the client closes the connection.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Something that happened on a connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The upgrade completed; frames can now be sent through the handle.
    Established(ConnectionHandle),
    /// The connection could not be established.
    ConnectFailed(Error),
    /// A complete data message arrived.
    Message(InboundFrame),
    /// The connection broke. Terminal.
    Error(String),
    /// The connection closed, by either side. Terminal.
    Closed {
        /// Status code from the peer's close frame, if one was received.
        code: Option<u16>,
    },
}

impl ConnectionEvent {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionEvent::ConnectFailed(_)
                | ConnectionEvent::Error(_)
                | ConnectionEvent::Closed { .. }
        )
    }
}

/// Work queued for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outbound {
    Text(String),
    Pong(Vec<u8>),
    Close(Option<u16>),
}

/// Cloneable send side of an established connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl ConnectionHandle {
    fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            outbound,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Returns `true` while text frames can be sent.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    /// Queue one text frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` once the connection has closed.
    pub fn send_text(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| Error::NotConnected)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.outbound.send(Outbound::Close(Some(NORMAL_CLOSURE)));
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// A handle backed by a bare channel, for exercising senders without a
    /// socket.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    #[cfg(test)]
    pub(crate) fn disconnect(&self) {
        self.mark_closed();
    }
}

/// Owns one duplex connection from connect to close.
///
/// Establishment and socket I/O run in background tasks; their outcomes
/// arrive through [`ConnectionManager::next_event`], which also keeps the
/// state machine current. At most one terminal event is ever returned.
pub struct ConnectionManager {
    client: ClientId,
    state: ConnectionState,
    events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    handle: Option<ConnectionHandle>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(client: ClientId) -> Self {
        Self {
            client,
            state: ConnectionState::Connecting,
            events: None,
            handle: None,
            task: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn handle(&self) -> Option<&ConnectionHandle> {
        self.handle.as_ref()
    }

    /// Returns `true` once a terminal event has been delivered or the
    /// connection was closed locally.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_some() && self.events.is_none()
    }

    /// Start establishing the connection in the background.
    ///
    /// The outcome is delivered as `Established` or `ConnectFailed`. Calling
    /// this more than once has no effect.
    pub fn connect(&mut self, config: &ClientConfig) {
        if self.task.is_some() {
            return;
        }
        debug!(client = %self.client, url = %config.url, "connecting");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events = Some(events_rx);
        self.task = Some(tokio::spawn(run_connection(
            self.client,
            config.clone(),
            events_tx,
        )));
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the connection has finished (or was never
    /// started).
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        let events = self.events.as_mut()?;
        let event = match events.recv().await {
            Some(event) => event,
            None => ConnectionEvent::Closed { code: None },
        };

        match &event {
            ConnectionEvent::Established(handle) => {
                self.state = ConnectionState::Connected;
                self.handle = Some(handle.clone());
            }
            ConnectionEvent::ConnectFailed(_) => {
                self.state = ConnectionState::Failed;
            }
            ConnectionEvent::Error(_) | ConnectionEvent::Closed { .. } => {
                self.state = ConnectionState::Closed;
                if let Some(handle) = &self.handle {
                    handle.mark_closed();
                }
            }
            ConnectionEvent::Message(_) => {}
        }

        if event.is_terminal() {
            self.events = None;
        }
        Some(event)
    }

    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` unless the state is `Connected`.
    pub fn send(&self, text: String) -> Result<()> {
        match (&self.handle, self.state.can_send()) {
            (Some(handle), true) => handle.send_text(text),
            _ => Err(Error::NotConnected),
        }
    }

    /// Close the connection.
    ///
    /// Sends a close frame when connected and abandons establishment when
    /// still connecting. Idempotent; a no-op if never started.
    pub fn close(&mut self) {
        if self.task.is_none() || !self.state.is_active() {
            return;
        }

        match &self.handle {
            Some(handle) if self.state.can_send() => handle.close(),
            _ => {
                if let Some(task) = &self.task {
                    task.abort();
                }
            }
        }

        debug!(client = %self.client, "closing connection");
        self.state = ConnectionState::Closed;
        self.events = None;
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client", &self.client)
            .field("state", &self.state)
            .finish()
    }
}

async fn run_connection(
    client: ClientId,
    config: ClientConfig,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let (frames, writer) = match establish(&config).await {
        Ok(halves) => halves,
        Err(e) => {
            debug!(client = %client, url = %config.url, error = %e, "connection failed");
            let _ = events.send(ConnectionEvent::ConnectFailed(e));
            return;
        }
    };
    debug!(client = %client, url = %config.url, "connected");

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(outbound_tx.clone());
    let open = Arc::clone(&handle.open);
    if events.send(ConnectionEvent::Established(handle)).is_err() {
        return;
    }

    tokio::spawn(write_loop(writer, outbound_rx, Arc::clone(&open)));

    let mut messages = MessageReader::new(frames, config.limits.clone());
    let terminal = loop {
        match messages.next(&outbound_tx).await {
            Ok(message) => {
                if events.send(ConnectionEvent::Message(message)).is_err() {
                    return;
                }
            }
            Err(Error::ConnectionClosed(code)) => break ConnectionEvent::Closed { code },
            Err(e) => break ConnectionEvent::Error(e.to_string()),
        }
    };

    open.store(false, Ordering::Release);
    let _ = events.send(terminal);
}

type Halves = (
    FrameReader<tokio::io::ReadHalf<MaybeTlsStream>>,
    FrameWriter<tokio::io::WriteHalf<MaybeTlsStream>>,
);

async fn establish(config: &ClientConfig) -> Result<Halves> {
    let target = config.target()?;
    let (connect_limit, handshake_limit) = match &config.timeouts {
        Some(t) => (Some(t.connect), Some(t.handshake)),
        None => (None, None),
    };

    let tcp = within(connect_limit, "connect", async {
        let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
        Ok::<_, Error>(tcp)
    })
    .await?;
    tcp.set_nodelay(true)?;

    let (stream, leftover) = within(handshake_limit, "handshake", async {
        let mut stream = secure(tcp, &target, config).await?;
        let leftover = upgrade(&mut stream, &target, &config.limits, config.read_buffer_size).await?;
        Ok::<_, Error>((stream, leftover))
    })
    .await?;

    let (read_half, write_half) = tokio::io::split(stream);
    Ok((
        FrameReader::with_buffered(read_half, config.limits.clone(), leftover),
        FrameWriter::new(write_half, config.write_buffer_size),
    ))
}

async fn within<T, F>(limit: Option<Duration>, phase: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(phase))?,
        None => fut.await,
    }
}

#[cfg(feature = "tls-rustls")]
async fn secure(tcp: TcpStream, target: &Target, config: &ClientConfig) -> Result<MaybeTlsStream> {
    if !target.secure {
        return Ok(MaybeTlsStream::Plain(tcp));
    }
    let connector = crate::tls::TlsConnector::from_options(&config.tls)?;
    let tls = connector.connect(&target.host, tcp).await?;
    Ok(MaybeTlsStream::Tls(Box::new(tls)))
}

#[cfg(not(feature = "tls-rustls"))]
async fn secure(tcp: TcpStream, target: &Target, _config: &ClientConfig) -> Result<MaybeTlsStream> {
    if target.secure {
        return Err(Error::Tls("built without TLS support".into()));
    }
    Ok(MaybeTlsStream::Plain(tcp))
}

/// Perform the upgrade exchange and return any bytes read past the
/// response head.
async fn upgrade<S>(stream: &mut S, target: &Target, limits: &Limits, capacity: usize) -> Result<BytesMut>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = HandshakeRequest::new(target)?;
    stream.write_all(&request.to_bytes()).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(capacity);
    loop {
        if let Some(end) = find_head_end(&buf) {
            request.verify(&buf[..end])?;
            buf.advance(end);
            return Ok(buf);
        }
        limits.check_handshake_size(buf.len())?;

        if stream.read_buf(&mut buf).await? == 0 {
            return Err(Error::InvalidHandshake(
                "connection closed during handshake".into(),
            ));
        }
    }
}

/// Turns frames into complete messages, answering control frames on the
/// way.
struct MessageReader<R> {
    frames: FrameReader<R>,
    limits: Limits,
    partial: Option<(OpCode, Vec<u8>)>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    fn new(frames: FrameReader<R>, limits: Limits) -> Self {
        Self {
            frames,
            limits,
            partial: None,
        }
    }

    /// Next complete data message.
    ///
    /// A close frame from the peer is answered and reported as
    /// `Error::ConnectionClosed` with its status code.
    async fn next(&mut self, outbound: &mpsc::UnboundedSender<Outbound>) -> Result<InboundFrame> {
        loop {
            let frame = self.frames.read_frame().await?;
            frame.validate()?;

            match frame.opcode {
                OpCode::Ping => {
                    let _ = outbound.send(Outbound::Pong(frame.into_payload()));
                }
                OpCode::Pong => {}
                OpCode::Close => {
                    let code = frame.close_code();
                    let _ = outbound.send(Outbound::Close(code));
                    return Err(Error::ConnectionClosed(code));
                }
                OpCode::Text | OpCode::Binary => {
                    if self.partial.is_some() {
                        return Err(Error::ProtocolViolation(
                            "data frame inside a fragmented message".into(),
                        ));
                    }
                    let opcode = frame.opcode;
                    let fin = frame.fin;
                    let payload = frame.into_payload();
                    self.limits.check_message_size(payload.len())?;
                    if fin {
                        return into_message(opcode, payload);
                    }
                    self.partial = Some((opcode, payload));
                }
                OpCode::Continuation => {
                    let (opcode, mut buf) = self.partial.take().ok_or_else(|| {
                        Error::ProtocolViolation("continuation without a message".into())
                    })?;
                    self.limits
                        .check_message_size(buf.len() + frame.payload().len())?;
                    let fin = frame.fin;
                    buf.extend_from_slice(frame.payload());
                    if fin {
                        return into_message(opcode, buf);
                    }
                    self.partial = Some((opcode, buf));
                }
            }
        }
    }
}

fn into_message(opcode: OpCode, payload: Vec<u8>) -> Result<InboundFrame> {
    match opcode {
        OpCode::Text => String::from_utf8(payload)
            .map(InboundFrame::Text)
            .map_err(|_| Error::InvalidUtf8),
        _ => Ok(InboundFrame::Binary(payload)),
    }
}

/// Drains queued frames onto the socket. A failed write only closes the
/// handle; the reader reports the broken connection.
async fn write_loop<W>(
    mut writer: FrameWriter<W>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = outbound.recv().await {
        let (frame, last) = match item {
            Outbound::Text(text) => (Frame::text(text), false),
            Outbound::Pong(data) => (Frame::pong(data), false),
            Outbound::Close(code) => (Frame::close(code, ""), true),
        };

        if writer.write_frame(&frame).await.is_err() {
            open.store(false, Ordering::Release);
            return;
        }
        if last {
            open.store(false, Ordering::Release);
            let _ = writer.shutdown().await;
            return;
        }
    }
}
