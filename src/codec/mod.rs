//! Frame-level encoding/decoding over async streams.

mod framed;

pub use framed::{FrameReader, FrameWriter};
