//! Lifecycle wiring that reports each finished request to the test.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use wsload::{BaseClient, RequestId, RequestResult, RequestStats};

pub struct Observed {
    pub lifecycle: BaseClient,
    pub stats: Arc<RequestStats>,
    pub outcomes: mpsc::UnboundedReceiver<(RequestId, RequestResult)>,
}

/// A [`BaseClient`] whose outcomes are forwarded to `outcomes`.
pub fn observed() -> Observed {
    let stats = Arc::new(RequestStats::new());
    let (tx, outcomes) = mpsc::unbounded_channel();
    let lifecycle = BaseClient::new(Arc::clone(&stats)).with_observer(move |id, result| {
        let _ = tx.send((id, result.clone()));
    });
    Observed {
        lifecycle,
        stats,
        outcomes,
    }
}

/// Next outcome, failing the test if none arrives within five seconds.
pub async fn next_outcome(
    outcomes: &mut mpsc::UnboundedReceiver<(RequestId, RequestResult)>,
) -> (RequestId, RequestResult) {
    tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .expect("timed out waiting for a request outcome")
        .expect("outcome channel closed")
}

/// Assert that no outcome arrives within `wait`.
pub async fn assert_no_outcome(
    outcomes: &mut mpsc::UnboundedReceiver<(RequestId, RequestResult)>,
    wait: Duration,
) {
    if let Ok(Some(outcome)) = tokio::time::timeout(wait, outcomes.recv()).await {
        panic!("unexpected outcome {outcome:?}");
    }
}
