//! Client-side WebSocket wire protocol (RFC 6455).

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use frame::{Frame, FrameHeader};
pub use handshake::{HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key};
pub use mask::{MaskGenerator, apply_mask};
pub use opcode::OpCode;
