use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameHeader, MaskGenerator};

/// Reads server frames from the read half of a connection.
pub struct FrameReader<R> {
    io: R,
    read_buf: BytesMut,
    limits: Limits,
}

impl<R> FrameReader<R> {
    #[must_use]
    pub fn new(io: R, limits: Limits, capacity: usize) -> Self {
        Self::with_buffered(io, limits, BytesMut::with_capacity(capacity))
    }

    /// Start from bytes already read past the handshake head; a server may
    /// send its first frame in the same segment as the 101 response.
    #[must_use]
    pub fn with_buffered(io: R, limits: Limits, read_buf: BytesMut) -> Self {
        Self {
            io,
            read_buf,
            limits,
        }
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read the next complete frame.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed(None)` on EOF
    /// - `Error::ProtocolViolation` for masked server frames
    /// - `Error::FrameTooLarge` when the declared length exceeds the limit
    /// - parse and I/O errors
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match FrameHeader::parse(&self.read_buf) {
                Ok(header) => {
                    if header.mask.is_some() {
                        return Err(Error::ProtocolViolation(
                            "server frames must not be masked".into(),
                        ));
                    }
                    self.limits.check_frame_size(header.payload_len)?;

                    match Frame::parse(&self.read_buf) {
                        Ok((frame, consumed)) => {
                            self.read_buf.advance(consumed);
                            return Ok(frame);
                        }
                        Err(Error::IncompleteFrame { needed }) => {
                            self.read_buf.reserve(needed);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(Error::IncompleteFrame { .. }) => {}
                Err(e) => return Err(e),
            }

            self.read_buf.reserve(4096);
            let n = self.io.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed(None));
            }
        }
    }
}

/// Writes masked client frames to the write half of a connection.
pub struct FrameWriter<W> {
    io: W,
    write_buf: Vec<u8>,
    masks: MaskGenerator,
}

impl<W> FrameWriter<W> {
    #[must_use]
    pub fn new(io: W, capacity: usize) -> Self {
        Self {
            io,
            write_buf: Vec::with_capacity(capacity),
            masks: MaskGenerator::new(),
        }
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.io
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Mask, serialize and flush one frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mask = self.masks.next_mask();
        self.write_buf.clear();
        self.write_buf.resize(frame.wire_size(true), 0);

        let written = frame.write(&mut self.write_buf, Some(mask))?;
        self.io.write_all(&self.write_buf[..written]).await?;
        self.io.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}
