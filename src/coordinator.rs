//! One-at-a-time request correlation over a shared connection.
//!
//! The channel has no request/response framing of its own, so the
//! coordinator keeps at most one request outstanding and treats the next
//! application message (or the connection's end) as its outcome.
//!
//! ```text
//!            dispatch                 response
//!   Idle ─────────────▶ AwaitingResponse ─────────▶ Idle
//!     │                      │
//!     └──── error/close ─────┴──── error/close ───▶ Terminated
//! ```

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::ClientConfig;
use crate::connection::ConnectionHandle;
use crate::error::RequestError;
use crate::latency::LatencyRecorder;
use crate::lifecycle::{ClientId, Finisher, RequestId};
use crate::message::{InboundFrame, MessageCodec};
use crate::request::{Completion, MessageGenerator, RequestSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinatorState {
    #[default]
    Idle,
    AwaitingResponse,
    Terminated,
}

/// The request currently awaiting its response.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: RequestId,
    /// Set only for direct-mode requests; adapters own their own timing.
    pub dispatched_at: Option<Instant>,
    completion: Completion,
}

#[derive(Debug)]
pub struct RequestCoordinator {
    client: ClientId,
    config: ClientConfig,
    generator: Option<MessageGenerator>,
    latency: LatencyRecorder,
    state: CoordinatorState,
    pending: Option<PendingRequest>,
}

impl RequestCoordinator {
    #[must_use]
    pub fn new(
        client: ClientId,
        config: ClientConfig,
        generator: Option<MessageGenerator>,
        latency: LatencyRecorder,
    ) -> Self {
        Self {
            client,
            config,
            generator,
            latency,
            state: CoordinatorState::Idle,
            pending: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    #[must_use]
    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// Start request `id` on `connection`.
    ///
    /// Only one request may be outstanding; a dispatch while another is
    /// awaiting its response is rejected, not queued. Every rejection is
    /// reported through `finisher`.
    pub fn dispatch(&mut self, connection: &ConnectionHandle, id: RequestId, finisher: Finisher) {
        self.settle();
        debug!(
            client = %self.client,
            request = %id,
            connected = connection.is_connected(),
            "begin request"
        );

        match self.state {
            CoordinatorState::Terminated => {
                warn!(client = %self.client, request = %id, "dispatch after connection ended");
                finisher(Err(RequestError::Terminated));
                return;
            }
            CoordinatorState::AwaitingResponse => {
                warn!(client = %self.client, request = %id, "request already in flight, rejecting");
                finisher(Err(RequestError::InFlight));
                return;
            }
            CoordinatorState::Idle => {}
        }

        if !connection.is_connected() {
            warn!(client = %self.client, request = %id, "dispatch on unconnected channel");
            finisher(Err(RequestError::NotConnected));
            return;
        }

        let Some(generator) = self.generator.clone() else {
            warn!(client = %self.client, request = %id, "no message generator");
            finisher(Err(RequestError::MissingGenerator));
            return;
        };

        let completion = Completion::new(finisher);
        match generator {
            MessageGenerator::Direct(generate) => {
                let text = MessageCodec::encode(generate(id));
                debug!(client = %self.client, request = %id, "sending message");
                let dispatched_at = Instant::now();
                if let Err(e) = connection.send_text(text) {
                    completion.finish(Err(RequestError::Connection(e.to_string())));
                    return;
                }
                self.await_response(id, Some(dispatched_at), completion);
            }
            MessageGenerator::Adapter(adapter) => {
                self.await_response(id, None, completion.clone());
                adapter(
                    &self.config,
                    RequestSender::new(connection.clone()),
                    completion,
                );
                self.settle();
            }
        }
    }

    fn await_response(&mut self, id: RequestId, dispatched_at: Option<Instant>, completion: Completion) {
        self.pending = Some(PendingRequest {
            id,
            dispatched_at,
            completion,
        });
        self.state = CoordinatorState::AwaitingResponse;
    }

    /// Drop a pending request that was completed from outside, by an
    /// adapter holding its [`Completion`].
    pub fn settle(&mut self) {
        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.completion.is_spent())
        {
            self.pending = None;
            if self.state == CoordinatorState::AwaitingResponse {
                self.state = CoordinatorState::Idle;
            }
        }
    }

    /// Correlate an inbound message with the pending request.
    pub fn on_inbound(&mut self, frame: InboundFrame) {
        self.settle();
        if self.state != CoordinatorState::AwaitingResponse {
            debug!(client = %self.client, kind = frame.kind(), "got message without being in a request");
            return;
        }

        let value = match MessageCodec::decode(&frame) {
            Ok(value) => value,
            Err(e) => {
                error!(client = %self.client, error = %e, "invalid message");
                return;
            }
        };
        debug!(client = %self.client, response = %value, "received response");

        if MessageCodec::is_handshake_notice(&value) {
            return;
        }

        let Some(pending) = self.pending.take() else {
            return;
        };
        self.state = CoordinatorState::Idle;

        if let Some(dispatched_at) = pending.dispatched_at {
            let elapsed = dispatched_at.elapsed();
            self.latency.add(elapsed);
            debug!(
                client = %self.client,
                request = %pending.id,
                latency_ms = elapsed.as_millis() as u64,
                "latency"
            );
        }
        pending.completion.finish(Ok(value));
    }

    /// The connection broke. Fails the pending request, if any.
    pub fn on_connection_error(&mut self, detail: impl Into<String>) {
        self.terminate(RequestError::Connection(detail.into()));
    }

    /// The connection closed. Fails the pending request, if any.
    pub fn on_connection_closed(&mut self) {
        self.terminate(RequestError::Closed);
    }

    fn terminate(&mut self, reason: RequestError) {
        self.settle();
        self.state = CoordinatorState::Terminated;
        if let Some(pending) = self.pending.take() {
            debug!(client = %self.client, request = %pending.id, error = %reason, "request failed");
            pending.completion.finish(Err(reason));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::lifecycle::RequestResult;
    use crate::message::Payload;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    type Outcomes = Arc<Mutex<Vec<(u64, RequestResult)>>>;

    struct Fixture {
        coordinator: RequestCoordinator,
        handle: ConnectionHandle,
        wire: UnboundedReceiver<Outbound>,
        latency: LatencyRecorder,
        outcomes: Outcomes,
    }

    impl Fixture {
        fn new(generator: Option<MessageGenerator>) -> Self {
            let latency = LatencyRecorder::new();
            let coordinator = RequestCoordinator::new(
                ClientId::from(1),
                ClientConfig::new("ws://127.0.0.1:9/"),
                generator,
                latency.clone(),
            );
            let (handle, wire) = ConnectionHandle::detached();
            Self {
                coordinator,
                handle,
                wire,
                latency,
                outcomes: Arc::default(),
            }
        }

        fn direct() -> Self {
            Self::new(Some(MessageGenerator::direct(|id| {
                json!({"op": "ping", "id": id.get()}).into()
            })))
        }

        fn finisher(&self, id: u64) -> Finisher {
            let outcomes = Arc::clone(&self.outcomes);
            Box::new(move |result| outcomes.lock().unwrap().push((id, result)))
        }

        fn dispatch(&mut self, id: u64) {
            let finisher = self.finisher(id);
            self.coordinator
                .dispatch(&self.handle, RequestId::from(id), finisher);
        }

        fn receive(&mut self, text: &str) {
            self.coordinator.on_inbound(InboundFrame::Text(text.into()));
        }

        fn sent(&mut self) -> Vec<String> {
            let mut sent = Vec::new();
            while let Ok(item) = self.wire.try_recv() {
                match item {
                    Outbound::Text(text) => sent.push(text),
                    other => panic!("unexpected outbound {other:?}"),
                }
            }
            sent
        }

        fn outcomes(&self) -> Vec<(u64, RequestResult)> {
            self.outcomes.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_dispatch_sends_encoded_payload() {
        let mut fx = Fixture::direct();
        fx.dispatch(0);

        assert_eq!(fx.coordinator.state(), CoordinatorState::AwaitingResponse);
        let sent = fx.sent();
        assert_eq!(sent.len(), 1);
        let body: Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(body, json!({"op": "ping", "id": 0}));

        let pending = fx.coordinator.pending().unwrap();
        assert_eq!(pending.id, RequestId::from(0));
        assert!(pending.dispatched_at.is_some());
    }

    #[test]
    fn test_text_payload_sent_verbatim() {
        let mut fx = Fixture::new(Some(MessageGenerator::direct(|_| {
            Payload::Text("subscribe:ticker".into())
        })));
        fx.dispatch(0);
        assert_eq!(fx.sent(), vec!["subscribe:ticker".to_string()]);
    }

    #[test]
    fn test_response_completes_request_once() {
        let mut fx = Fixture::direct();
        fx.dispatch(0);
        fx.receive(r#"{"ok":true}"#);

        assert_eq!(fx.outcomes(), vec![(0, Ok(json!({"ok": true})))]);
        assert_eq!(fx.coordinator.state(), CoordinatorState::Idle);
        assert!(fx.coordinator.pending().is_none());
        assert_eq!(fx.latency.len(), 1);

        fx.receive(r#"{"ok":"again"}"#);
        fx.coordinator.on_connection_closed();
        assert_eq!(fx.outcomes().len(), 1);
        assert_eq!(fx.latency.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentinel_then_response_after_42ms() {
        let mut fx = Fixture::direct();
        fx.dispatch(0);

        fx.receive(r#"[["client_connected"]]"#);
        assert!(fx.outcomes().is_empty());
        assert!(fx.latency.is_empty());
        assert_eq!(fx.coordinator.state(), CoordinatorState::AwaitingResponse);

        tokio::time::advance(Duration::from_millis(42)).await;
        fx.receive(r#"{"ok":true}"#);

        assert_eq!(fx.outcomes(), vec![(0, Ok(json!({"ok": true})))]);
        assert_eq!(fx.latency.samples_ms(), vec![42]);
    }

    #[test]
    fn test_malformed_frame_keeps_request_pending() {
        let mut fx = Fixture::direct();
        fx.dispatch(0);

        fx.receive("{not valid json");
        assert!(fx.outcomes().is_empty());
        assert_eq!(fx.coordinator.state(), CoordinatorState::AwaitingResponse);

        fx.receive(r#"{"ok":1}"#);
        assert_eq!(fx.outcomes(), vec![(0, Ok(json!({"ok": 1})))]);
    }

    #[test]
    fn test_binary_frame_is_discarded() {
        let mut fx = Fixture::direct();
        fx.dispatch(0);

        fx.coordinator
            .on_inbound(InboundFrame::Binary(br#"{"ok":true}"#.to_vec()));
        assert!(fx.outcomes().is_empty());
        assert_eq!(fx.coordinator.state(), CoordinatorState::AwaitingResponse);
    }

    #[test]
    fn test_unsolicited_message_is_ignored() {
        let mut fx = Fixture::direct();
        fx.receive(r#"{"push":true}"#);
        assert!(fx.outcomes().is_empty());
        assert_eq!(fx.coordinator.state(), CoordinatorState::Idle);
    }

    #[test]
    fn test_close_while_idle_fires_nothing() {
        let mut fx = Fixture::direct();
        fx.coordinator.on_connection_closed();
        assert!(fx.outcomes().is_empty());
        assert_eq!(fx.coordinator.state(), CoordinatorState::Terminated);
    }

    #[test]
    fn test_close_while_awaiting_fails_request() {
        let mut fx = Fixture::direct();
        fx.dispatch(0);
        fx.coordinator.on_connection_closed();

        let outcomes = fx.outcomes();
        assert_eq!(outcomes.len(), 1);
        let err = outcomes[0].1.clone().unwrap_err();
        assert_eq!(err, RequestError::Closed);
        assert!(err.to_string().contains("closed"));
        assert!(fx.latency.is_empty());
        assert_eq!(fx.coordinator.state(), CoordinatorState::Terminated);
    }

    #[test]
    fn test_error_while_awaiting_fails_request() {
        let mut fx = Fixture::direct();
        fx.dispatch(0);
        fx.coordinator.on_connection_error("connection reset");
        fx.coordinator.on_connection_closed();

        let outcomes = fx.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            outcomes[0].1.clone().unwrap_err().to_string(),
            "connection error: connection reset"
        );
    }

    #[test]
    fn test_second_dispatch_is_rejected_not_queued() {
        let mut fx = Fixture::direct();
        fx.dispatch(0);
        fx.dispatch(1);

        assert_eq!(fx.outcomes(), vec![(1, Err(RequestError::InFlight))]);
        assert_eq!(fx.sent().len(), 1);
        assert_eq!(fx.coordinator.pending().unwrap().id, RequestId::from(0));

        fx.receive(r#"{"ok":true}"#);
        assert_eq!(fx.outcomes()[1], (0, Ok(json!({"ok": true}))));
        assert!(fx.sent().is_empty());
    }

    #[test]
    fn test_sequential_requests() {
        let mut fx = Fixture::direct();
        for id in 0..3 {
            fx.dispatch(id);
            fx.receive(&format!(r#"{{"n":{id}}}"#));
        }
        let ids: Vec<u64> = fx.outcomes().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(fx.sent().len(), 3);
        assert_eq!(fx.latency.len(), 3);
    }

    #[test]
    fn test_dispatch_after_termination() {
        let mut fx = Fixture::direct();
        fx.coordinator.on_connection_error("gone");
        fx.dispatch(0);
        assert_eq!(fx.outcomes(), vec![(0, Err(RequestError::Terminated))]);
        assert!(fx.sent().is_empty());
    }

    #[test]
    fn test_dispatch_without_generator() {
        let mut fx = Fixture::new(None);
        fx.dispatch(0);
        assert_eq!(fx.outcomes(), vec![(0, Err(RequestError::MissingGenerator))]);
        assert!(fx.sent().is_empty());
        assert_eq!(fx.coordinator.state(), CoordinatorState::Idle);
    }

    #[test]
    fn test_dispatch_on_unconnected_handle() {
        let mut fx = Fixture::direct();
        fx.handle.disconnect();
        fx.dispatch(0);
        assert_eq!(fx.outcomes(), vec![(0, Err(RequestError::NotConnected))]);
        assert_eq!(fx.coordinator.state(), CoordinatorState::Idle);
    }

    #[test]
    fn test_adapter_sends_and_inbound_completes_without_latency() {
        let seen_url = Arc::new(Mutex::new(None));
        let url_sink = Arc::clone(&seen_url);
        let mut fx = Fixture::new(Some(MessageGenerator::adapter(move |config, sender, _| {
            *url_sink.lock().unwrap() = Some(config.url.clone());
            sender.write("adapter-frame").unwrap();
        })));

        fx.dispatch(0);
        assert_eq!(fx.sent(), vec!["adapter-frame".to_string()]);
        assert_eq!(seen_url.lock().unwrap().as_deref(), Some("ws://127.0.0.1:9/"));
        assert!(fx.coordinator.pending().unwrap().dispatched_at.is_none());

        fx.receive(r#"{"ok":true}"#);
        assert_eq!(fx.outcomes(), vec![(0, Ok(json!({"ok": true})))]);
        assert!(fx.latency.is_empty());
    }

    #[test]
    fn test_adapter_completing_itself() {
        let mut fx = Fixture::new(Some(MessageGenerator::adapter(|_, _, completion| {
            completion.finish(Ok(json!("done")));
        })));

        fx.dispatch(0);
        assert_eq!(fx.outcomes(), vec![(0, Ok(json!("done")))]);
        assert_eq!(fx.coordinator.state(), CoordinatorState::Idle);

        fx.receive(r#"{"late":true}"#);
        fx.coordinator.on_connection_closed();
        assert_eq!(fx.outcomes().len(), 1);
    }

    #[test]
    fn test_adapter_completion_from_outside_is_settled() {
        let stash: Arc<Mutex<Option<Completion>>> = Arc::default();
        let keep = Arc::clone(&stash);
        let mut fx = Fixture::new(Some(MessageGenerator::adapter(move |_, _, completion| {
            *keep.lock().unwrap() = Some(completion);
        })));

        fx.dispatch(0);
        assert_eq!(fx.coordinator.state(), CoordinatorState::AwaitingResponse);

        let completion = stash.lock().unwrap().take().unwrap();
        assert!(completion.finish(Err(RequestError::Connection("adapter gave up".into()))));
        fx.coordinator.settle();
        assert_eq!(fx.coordinator.state(), CoordinatorState::Idle);

        fx.dispatch(1);
        assert_eq!(fx.coordinator.pending().unwrap().id, RequestId::from(1));
    }

    #[derive(Debug, Clone)]
    enum Inbound {
        Sentinel,
        Garbage,
        Binary,
        Valid,
    }

    fn inbound_strategy() -> impl proptest::strategy::Strategy<Value = Inbound> {
        use proptest::prelude::*;
        prop_oneof![
            Just(Inbound::Sentinel),
            Just(Inbound::Garbage),
            Just(Inbound::Binary),
            Just(Inbound::Valid),
        ]
    }

    proptest::proptest! {
        #[test]
        fn test_callback_fires_exactly_once(
            events in proptest::collection::vec(inbound_strategy(), 0..12),
            error_at_end in proptest::prelude::any::<bool>()
        ) {
            let mut fx = Fixture::direct();
            fx.dispatch(0);
            for event in &events {
                match event {
                    Inbound::Sentinel => fx.receive(r#"[["client_connected"]]"#),
                    Inbound::Garbage => fx.receive("{not valid json"),
                    Inbound::Binary => fx.coordinator.on_inbound(InboundFrame::Binary(vec![1, 2])),
                    Inbound::Valid => fx.receive(r#"{"ok":true}"#),
                }
            }
            if error_at_end {
                fx.coordinator.on_connection_error("reset");
            } else {
                fx.coordinator.on_connection_closed();
            }

            let outcomes = fx.outcomes();
            proptest::prop_assert_eq!(outcomes.len(), 1);
            let answered = events.iter().any(|e| matches!(e, Inbound::Valid));
            proptest::prop_assert_eq!(outcomes[0].1.is_ok(), answered);
            proptest::prop_assert_eq!(fx.latency.len(), usize::from(answered));
            proptest::prop_assert_eq!(fx.coordinator.state(), CoordinatorState::Terminated);
        }
    }
}
