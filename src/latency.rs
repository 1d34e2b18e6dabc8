//! Round-trip latency samples shared across clients.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Append-only, ordered sequence of round-trip samples.
///
/// Clones share the same samples.
#[derive(Debug, Clone, Default)]
pub struct LatencyRecorder {
    samples: Arc<Mutex<Vec<Duration>>>,
}

/// Aggregates over recorded samples, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub count: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Duration>> {
        // A panic while pushing cannot leave the Vec inconsistent.
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, elapsed: Duration) {
        self.lock().push(elapsed);
    }

    #[must_use]
    pub fn samples(&self) -> Vec<Duration> {
        self.lock().clone()
    }

    /// Samples in whole milliseconds, in recording order.
    #[must_use]
    pub fn samples_ms(&self) -> Vec<u128> {
        self.lock().iter().map(Duration::as_millis).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns `None` when nothing has been recorded.
    #[must_use]
    pub fn summary(&self) -> Option<LatencySummary> {
        let mut sorted = self.samples();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_unstable();

        let ms = |d: Duration| d.as_nanos() as f64 / 1_000_000.0;
        let percentile = |p: usize| {
            let idx = (sorted.len() * p / 100).min(sorted.len() - 1);
            ms(sorted[idx])
        };
        let total: Duration = sorted.iter().sum();

        Some(LatencySummary {
            count: sorted.len(),
            min_ms: ms(sorted[0]),
            max_ms: ms(sorted[sorted.len() - 1]),
            mean_ms: ms(total) / sorted.len() as f64,
            p50_ms: percentile(50),
            p95_ms: percentile(95),
            p99_ms: percentile(99),
        })
    }
}

impl std::fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "n={} min={:.2}ms mean={:.2}ms p50={:.2}ms p95={:.2}ms p99={:.2}ms max={:.2}ms",
            self.count,
            self.min_ms,
            self.mean_ms,
            self.p50_ms,
            self.p95_ms,
            self.p99_ms,
            self.max_ms
        )
    }
}
