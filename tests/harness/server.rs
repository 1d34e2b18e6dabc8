//! In-process WebSocket server with scripted behaviors.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const SENTINEL: &str = r#"[["client_connected"]]"#;
pub const OK: &str = r#"{"ok":true}"#;

/// How the server treats each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Greet with the sentinel, then answer every request with [`OK`]
    /// after `delay`.
    Respond { delay: Duration },
    /// Send every text message straight back.
    Echo,
    /// Greet, then answer every request with malformed JSON followed by [`OK`].
    GarbageFirst,
    /// Greet, then answer every request with a binary frame followed by [`OK`].
    BinaryFirst,
    /// Close the connection (code 1000) on the first request.
    CloseOnRequest,
    /// Accept requests and never answer.
    Silent,
}

#[derive(Clone)]
struct Shared {
    mode: Mode,
    received: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
}

pub struct TestServer {
    addr: SocketAddr,
    received: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Shared {
            mode,
            received: Arc::new(AtomicUsize::new(0)),
            connections: Arc::new(AtomicUsize::new(0)),
        };
        let received = Arc::clone(&shared.received);
        let connections = Arc::clone(&shared.connections);

        let app = Router::new().route("/ws", get(upgrade)).with_state(shared);
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            received,
            connections,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Text messages received across all connections.
    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    /// Wait until `count` text messages have arrived.
    pub async fn wait_for_received(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.received() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for requests");
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn upgrade(ws: WebSocketUpgrade, State(shared): State<Shared>) -> Response {
    ws.on_upgrade(move |socket| serve(socket, shared))
}

async fn serve(mut socket: WebSocket, shared: Shared) {
    shared.connections.fetch_add(1, Ordering::SeqCst);

    let greets = matches!(
        shared.mode,
        Mode::Respond { .. } | Mode::GarbageFirst | Mode::BinaryFirst
    );
    if greets && socket.send(Message::Text(SENTINEL.into())).await.is_err() {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        shared.received.fetch_add(1, Ordering::SeqCst);

        let replies = match shared.mode {
            Mode::Respond { delay } => {
                tokio::time::sleep(delay).await;
                vec![Message::Text(OK.into())]
            }
            Mode::Echo => vec![Message::Text(text)],
            Mode::GarbageFirst => vec![
                Message::Text("{not valid json".into()),
                Message::Text(OK.into()),
            ],
            Mode::BinaryFirst => vec![
                Message::Binary(OK.as_bytes().to_vec().into()),
                Message::Text(OK.into()),
            ],
            Mode::CloseOnRequest => vec![Message::Close(Some(CloseFrame {
                code: 1000,
                reason: "done".into(),
            }))],
            Mode::Silent => Vec::new(),
        };

        for reply in replies {
            if socket.send(reply).await.is_err() {
                return;
            }
        }
    }
}
