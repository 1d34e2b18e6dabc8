//! The per-client actor driven by a load-test runner.

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::coordinator::RequestCoordinator;
use crate::error::RequestError;
use crate::latency::LatencyRecorder;
use crate::lifecycle::{ClientId, Finisher, RequestId, RequestLifecycle};
use crate::request::MessageGenerator;

#[derive(Debug)]
enum Command {
    StartRequests,
    Stop,
    Finished(RequestId),
}

/// A load-test client: one connection, one request at a time.
///
/// Build it with [`WebsocketClient::new`], then [`start`](Self::start) it to
/// get a [`ClientHandle`]. The client issues its first request as soon as
/// the connection is established; each further request is triggered through
/// [`ClientHandle::start_requests`].
pub struct WebsocketClient<L> {
    id: ClientId,
    config: ClientConfig,
    lifecycle: L,
    manager: ConnectionManager,
    coordinator: RequestCoordinator,
}

type Notify = mpsc::WeakUnboundedSender<Command>;

impl<L: RequestLifecycle> WebsocketClient<L> {
    pub fn new(
        id: ClientId,
        config: ClientConfig,
        generator: Option<MessageGenerator>,
        mut lifecycle: L,
        latency: LatencyRecorder,
    ) -> Self {
        lifecycle.init();
        Self {
            id,
            manager: ConnectionManager::new(id),
            coordinator: RequestCoordinator::new(id, config.clone(), generator, latency),
            config,
            lifecycle,
        }
    }

    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Connect and run the client in a background task.
    pub fn start(self) -> ClientHandle {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        // Finishers hold weak senders only, so the task ends once every
        // handle is gone.
        let notify = commands.downgrade();
        let id = self.id;
        let task = tokio::spawn(self.run(commands_rx, notify));
        ClientHandle {
            id,
            commands,
            task: Some(task),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, notify: Notify) {
        self.manager.connect(&self.config);

        loop {
            tokio::select! {
                Some(event) = self.manager.next_event(), if !self.manager.is_finished() => {
                    if !self.on_event(event, &notify) {
                        break;
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::StartRequests) => self.make_request(&notify),
                    Some(Command::Finished(_)) => self.coordinator.settle(),
                    Some(Command::Stop) | None => {
                        self.stop();
                        break;
                    }
                },
            }
        }
    }

    /// Returns `false` when the client has nothing left to do.
    fn on_event(&mut self, event: ConnectionEvent, notify: &Notify) -> bool {
        match event {
            ConnectionEvent::Established(_) => self.make_request(notify),
            ConnectionEvent::ConnectFailed(_) => return false,
            ConnectionEvent::Message(frame) => self.coordinator.on_inbound(frame),
            ConnectionEvent::Error(detail) => self.coordinator.on_connection_error(detail),
            ConnectionEvent::Closed { .. } => self.coordinator.on_connection_closed(),
        }
        true
    }

    fn make_request(&mut self, notify: &Notify) {
        let id = self.lifecycle.start_request();
        let finisher = self.request_finisher(id, notify);
        match self.manager.handle() {
            Some(connection) => self.coordinator.dispatch(connection, id, finisher),
            None => finisher(Err(RequestError::NotConnected)),
        }
    }

    /// The lifecycle's finisher, preceded by a note to this client so the
    /// coordinator drops its pending marker.
    fn request_finisher(&self, id: RequestId, notify: &Notify) -> Finisher {
        let base = self.lifecycle.request_finisher(id);
        let notify = notify.clone();
        Box::new(move |result| {
            if let Some(commands) = notify.upgrade() {
                let _ = commands.send(Command::Finished(id));
            }
            base(result);
        })
    }

    fn stop(&mut self) {
        let connected = self.manager.handle().is_some();
        self.manager.close();
        if connected {
            self.coordinator.on_connection_closed();
            debug!(client = %self.id, url = %self.config.url, "disconnected");
        }
    }
}

impl<L> std::fmt::Debug for WebsocketClient<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebsocketClient")
            .field("id", &self.id)
            .field("url", &self.config.url)
            .field("connection", &self.manager)
            .finish()
    }
}

/// Driver-side control of a started client.
#[derive(Debug)]
pub struct ClientHandle {
    id: ClientId,
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl ClientHandle {
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Issue the next request. It is rejected if one is still in flight.
    pub fn start_requests(&self) {
        let _ = self.commands.send(Command::StartRequests);
    }

    /// Close the connection and end the client. A pending request fails
    /// with "connection closed".
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// Returns `true` once the client task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the client task to end.
    ///
    /// # Errors
    ///
    /// Returns the task's `JoinError` if it panicked.
    pub async fn join(mut self) -> Result<(), JoinError> {
        match self.task.take() {
            Some(task) => task.await,
            None => Ok(()),
        }
    }
}
