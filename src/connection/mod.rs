//! One client's duplex connection: establishment, socket I/O and state.

mod manager;
mod state;
mod stream;

pub use manager::{ConnectionEvent, ConnectionHandle, ConnectionManager, NORMAL_CLOSURE};
pub(crate) use manager::Outbound;
pub use state::ConnectionState;
pub use stream::MaybeTlsStream;
