//! # wsload - WebSocket load-test client
//!
//! `wsload` drives request/response traffic over plain WebSocket connections
//! and measures round-trip latency. WebSocket has no request correlation of
//! its own, so each client keeps exactly one request in flight and treats
//! the next application message as its response.
//!
//! ## Features
//!
//! - **One request at a time** per connection, with exactly-once completion
//! - **Latency samples** shared across clients, with percentile summaries
//! - **Direct or adapter payloads**: a per-request generator, or an adapter
//!   that takes over sending and correlation
//! - **RFC 6455 client framing** with masking, ping/pong and reassembly
//! - **TLS** for `wss://`, with optional client certificates
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use wsload::{BaseClient, ClientConfig, ClientIds, LatencyRecorder, MessageGenerator,
//!              RequestStats, WebsocketClient};
//!
//! # async fn run() {
//! let ids = ClientIds::new();
//! let latency = LatencyRecorder::new();
//! let stats = Arc::new(RequestStats::new());
//!
//! let client = WebsocketClient::new(
//!     ids.next_id(),
//!     ClientConfig::new("ws://127.0.0.1:9001/ws"),
//!     Some(MessageGenerator::direct(|id| json!({"op": "ping", "id": id.get()}).into())),
//!     BaseClient::new(stats.clone()),
//!     latency.clone(),
//! );
//! let handle = client.start();
//! // ... later
//! handle.stop();
//! handle.join().await.unwrap();
//! println!("{:?}", latency.summary());
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod latency;
pub mod lifecycle;
pub mod message;
pub mod protocol;
pub mod request;

#[cfg(feature = "tls-rustls")]
pub mod tls;

pub use client::{ClientHandle, WebsocketClient};
pub use config::{ClientConfig, Limits, Target, Timeouts, TlsOptions};
pub use connection::{ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState};
pub use coordinator::{CoordinatorState, RequestCoordinator};
pub use error::{DecodeError, Error, RequestError, Result};
pub use latency::{LatencyRecorder, LatencySummary};
pub use lifecycle::{
    BaseClient, ClientId, ClientIds, Finisher, RequestId, RequestLifecycle, RequestResult,
    RequestStats, StatsSnapshot,
};
pub use message::{InboundFrame, MessageCodec, Payload};
pub use request::{Completion, MessageGenerator, RequestSender};
