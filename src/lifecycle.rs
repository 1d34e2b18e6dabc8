//! Request lifecycle shared by load-test clients.
//!
//! A client asks its lifecycle for a request id when it begins a request and
//! for a [`Finisher`] to call when that request ends. [`BaseClient`] is the
//! stock implementation: it numbers requests and keeps aggregate counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::error::RequestError;

/// Identity of one client, unique per [`ClientIds`] allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ClientId {
    fn from(id: u64) -> Self {
        ClientId(id)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out client ids, starting from zero.
///
/// Owned by whatever spawns the clients, so separate runs never share a
/// counter.
#[derive(Debug, Default)]
pub struct ClientIds {
    next: AtomicU64,
}

impl ClientIds {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> ClientId {
        ClientId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of one request. Used in logs only; never sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId(id)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome delivered to a request's finisher.
pub type RequestResult = Result<Value, RequestError>;

/// Completion callback for one request. Being `FnOnce`, it can run at most
/// once.
pub type Finisher = Box<dyn FnOnce(RequestResult) + Send + 'static>;

/// The hooks a client consumes from its lifecycle.
pub trait RequestLifecycle: Send + 'static {
    /// Called once when the client is constructed.
    fn init(&mut self) {}

    /// Allocate the id for a new request.
    fn start_request(&mut self) -> RequestId;

    /// Build the completion callback for request `id`.
    fn request_finisher(&self, id: RequestId) -> Finisher;
}

/// Aggregate request counters. Shared between clients through an `Arc`.
#[derive(Debug, Default)]
pub struct RequestStats {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`RequestStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl RequestStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record_start(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, result: &RequestResult) {
        let counter = match result {
            Ok(_) => &self.succeeded,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

type Observer = Arc<dyn Fn(RequestId, &RequestResult) + Send + Sync>;

/// Stock lifecycle: sequential request ids, shared counters, and an
/// optional observer that sees every outcome.
#[derive(Clone)]
pub struct BaseClient {
    next_request: u64,
    stats: Arc<RequestStats>,
    observer: Option<Observer>,
}

impl BaseClient {
    #[must_use]
    pub fn new(stats: Arc<RequestStats>) -> Self {
        Self {
            next_request: 0,
            stats,
            observer: None,
        }
    }

    /// Call `observer` with every finished request's outcome.
    #[must_use]
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(RequestId, &RequestResult) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<RequestStats> {
        &self.stats
    }
}

impl Default for BaseClient {
    fn default() -> Self {
        Self::new(Arc::new(RequestStats::new()))
    }
}

impl std::fmt::Debug for BaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseClient")
            .field("next_request", &self.next_request)
            .field("stats", &self.stats)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl RequestLifecycle for BaseClient {
    fn start_request(&mut self) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        self.stats.record_start();
        id
    }

    fn request_finisher(&self, id: RequestId) -> Finisher {
        let stats = Arc::clone(&self.stats);
        let observer = self.observer.clone();
        Box::new(move |result| {
            stats.record(&result);
            if let Some(observer) = observer {
                observer(id, &result);
            }
        })
    }
}
