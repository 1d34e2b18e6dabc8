//! Hand-rolled server side of the upgrade, for peers axum cannot play
//! (TLS listeners).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use wsload::protocol::handshake::find_head_end;
use wsload::protocol::{Frame, compute_accept_key};

/// Read an upgrade request and answer it with `101 Switching Protocols`.
pub async fn accept_upgrade<S>(stream: &mut S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    while find_head_end(&buf).is_none() {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed during handshake");
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8(buf).unwrap();
    let key = head
        .lines()
        .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
        .unwrap();
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        compute_accept_key(key)
    );
    stream.write_all(response.as_bytes()).await.unwrap();
}

/// Read one (masked) client frame.
pub async fn read_frame<S>(stream: &mut S) -> Frame
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        if let Ok((frame, _)) = Frame::parse(&buf) {
            return frame;
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed before sending a frame");
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Write one unmasked server text frame.
pub async fn write_text<S>(stream: &mut S, text: &str)
where
    S: AsyncWrite + Unpin,
{
    let frame = Frame::text(text);
    let mut buf = vec![0u8; frame.wire_size(false)];
    let n = frame.write(&mut buf, None).unwrap();
    stream.write_all(&buf[..n]).await.unwrap();
    stream.flush().await.unwrap();
}
