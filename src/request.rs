//! How request payloads are produced and how a request is completed.

use std::sync::{Arc, Mutex, PoisonError};

use crate::config::ClientConfig;
use crate::connection::ConnectionHandle;
use crate::error::Result;
use crate::lifecycle::{Finisher, RequestId, RequestResult};
use crate::message::Payload;

/// Take-once slot holding a request's finisher.
///
/// Clones share the slot; whichever clone finishes first runs the finisher
/// and every later call is a no-op.
#[derive(Clone)]
pub struct Completion {
    slot: Arc<Mutex<Option<Finisher>>>,
}

impl Completion {
    #[must_use]
    pub fn new(finisher: Finisher) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(finisher))),
        }
    }

    /// Run the finisher with `result`.
    ///
    /// Returns `false` if the request was already finished.
    pub fn finish(&self, result: RequestResult) -> bool {
        let finisher = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match finisher {
            Some(finisher) => {
                finisher(result);
                true
            }
            None => false,
        }
    }

    /// Returns `true` once the finisher has run.
    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("spent", &self.is_spent())
            .finish()
    }
}

/// Send capability handed to adapter generators: it writes raw text
/// frames and nothing else.
#[derive(Debug, Clone)]
pub struct RequestSender {
    connection: ConnectionHandle,
}

impl RequestSender {
    pub(crate) fn new(connection: ConnectionHandle) -> Self {
        Self { connection }
    }

    /// Send `text` as one text frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` once the connection has closed.
    pub fn write(&self, text: impl Into<String>) -> Result<()> {
        self.connection.send_text(text.into())
    }
}

type DirectFn = dyn Fn(RequestId) -> Payload + Send + Sync;
type AdapterFn = dyn Fn(&ClientConfig, RequestSender, Completion) + Send + Sync;

/// Strategy for producing each request.
#[derive(Clone)]
pub enum MessageGenerator {
    /// Build a payload per request; the client sends it and correlates the
    /// next inbound message with it.
    Direct(Arc<DirectFn>),
    /// Hand the client configuration, a [`RequestSender`] and the request's
    /// [`Completion`] to the adapter, which owns sending and correlation.
    Adapter(Arc<AdapterFn>),
}

impl MessageGenerator {
    pub fn direct<F>(generate: F) -> Self
    where
        F: Fn(RequestId) -> Payload + Send + Sync + 'static,
    {
        MessageGenerator::Direct(Arc::new(generate))
    }

    pub fn adapter<F>(adapter: F) -> Self
    where
        F: Fn(&ClientConfig, RequestSender, Completion) + Send + Sync + 'static,
    {
        MessageGenerator::Adapter(Arc::new(adapter))
    }
}

impl std::fmt::Debug for MessageGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageGenerator::Direct(_) => f.write_str("MessageGenerator::Direct"),
            MessageGenerator::Adapter(_) => f.write_str("MessageGenerator::Adapter"),
        }
    }
}
