//! Frame parsing and serialization (RFC 6455 section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking key (if MASK)     |          Payload data         |
//! +-------------------------------+-------------------------------+
//! ```

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// FIN bit.
    pub fin: bool,
    /// RSV1-3 packed into the low three bits.
    pub rsv: u8,
    /// Opcode.
    pub opcode: OpCode,
    /// Masking key, if the MASK bit was set.
    pub mask: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_len: usize,
    /// Bytes occupied by the header itself.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse just the header, so limits can be checked before buffering the
    /// payload.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if `buf` does not hold the full header
    /// - `Error::ReservedOpcode` for reserved opcodes
    /// - `Error::FrameTooLarge` if the 64-bit length does not fit in `usize`
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let fin = buf[0] & 0x80 != 0;
        let rsv = (buf[0] >> 4) & 0x07;
        let opcode = OpCode::from_u8(buf[0])?;
        let masked = buf[1] & 0x80 != 0;

        let (payload_len, len_size) = match buf[1] & 0x7F {
            126 => {
                if buf.len() < 4 {
                    return Err(Error::IncompleteFrame {
                        needed: 4 - buf.len(),
                    });
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Err(Error::IncompleteFrame {
                        needed: 10 - buf.len(),
                    });
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                let len = usize::try_from(len).map_err(|_| Error::FrameTooLarge {
                    size: usize::MAX,
                    max: usize::MAX,
                })?;
                (len, 10)
            }
            short => (short as usize, 2),
        };

        let header_len = if masked { len_size + 4 } else { len_size };
        if buf.len() < header_len {
            return Err(Error::IncompleteFrame {
                needed: header_len - buf.len(),
            });
        }

        let mask = masked.then(|| [buf[len_size], buf[len_size + 1], buf[len_size + 2], buf[len_size + 3]]);

        Ok(Self {
            fin,
            rsv,
            opcode,
            mask,
            payload_len,
            header_len,
        })
    }
}

/// A single WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// RSV1-3 packed into the low three bits. Always zero here: no
    /// extensions are negotiated.
    pub rsv: u8,
    /// Frame opcode.
    pub opcode: OpCode,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv: 0,
            opcode,
            payload,
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Create a close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut data = code.to_be_bytes().to_vec();
                data.extend_from_slice(reason.as_bytes());
                data
            }
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Create a pong frame echoing a ping payload.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Status code carried by a close frame, if any.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match (self.opcode, self.payload.as_slice()) {
            (OpCode::Close, [hi, lo, ..]) => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Parse one frame from the front of `buf`, unmasking if needed.
    ///
    /// Returns the frame and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if not enough data is available
    /// - header errors from [`FrameHeader::parse`]
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        let total = header
            .header_len
            .checked_add(header.payload_len)
            .ok_or(Error::FrameTooLarge {
                size: header.payload_len,
                max: usize::MAX - header.header_len,
            })?;

        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let mut payload = buf[header.header_len..total].to_vec();
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        let frame = Frame {
            fin: header.fin,
            rsv: header.rsv,
            opcode: header.opcode,
            payload,
        };
        Ok((frame, total))
    }

    /// Check the frame against RFC 6455 rules.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedBitsSet` if any RSV bit is set
    /// - `Error::FragmentedControlFrame` if a control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if a control payload exceeds 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.rsv != 0 {
            return Err(Error::ReservedBitsSet);
        }
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }
        Ok(())
    }

    /// Bytes needed to serialize this frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let len = self.payload.len();
        let extended = match len {
            0..=125 => 0,
            126..=65535 => 2,
            _ => 8,
        };
        let mask_size = if masked { 4 } else { 0 };
        2 + extended + mask_size + len
    }

    /// Serialize into `buf`, masking the payload when `mask` is given.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidFrame` if `buf` is smaller than [`Frame::wire_size`].
    pub fn write(&self, buf: &mut [u8], mask: Option<[u8; 4]>) -> Result<usize> {
        let total = self.wire_size(mask.is_some());
        if buf.len() < total {
            return Err(Error::InvalidFrame(format!(
                "Buffer too small: need {} bytes, have {}",
                total,
                buf.len()
            )));
        }

        let len = self.payload.len();
        let fin_bit = if self.fin { 0x80 } else { 0 };
        buf[0] = fin_bit | (self.rsv << 4) | self.opcode.as_u8();
        let mask_bit = if mask.is_some() { 0x80 } else { 0 };

        let mut offset = 2;
        if len <= 125 {
            buf[1] = mask_bit | len as u8;
        } else if len <= 65535 {
            buf[1] = mask_bit | 126;
            buf[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            offset = 4;
        } else {
            buf[1] = mask_bit | 127;
            buf[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            offset = 10;
        }

        if let Some(key) = mask {
            buf[offset..offset + 4].copy_from_slice(&key);
            offset += 4;
        }

        let body = &mut buf[offset..offset + len];
        body.copy_from_slice(&self.payload);
        if let Some(key) = mask {
            apply_mask(body, key);
        }

        Ok(total)
    }
}
