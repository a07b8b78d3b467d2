//! Local stand-ins for the upstream streaming service and the webhook sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{any, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use chatrelay_core::{ForwardPayload, RelayConfig};
use chatrelay_upstream::UpstreamEndpoint;

#[derive(Clone)]
struct UpstreamState {
    connections: Arc<AtomicUsize>,
    received: mpsc::UnboundedSender<String>,
    push: broadcast::Sender<String>,
    kick: broadcast::Sender<()>,
    closes: mpsc::UnboundedSender<String>,
}

pub(crate) struct FakeUpstream {
    pub port: u16,
    connections: Arc<AtomicUsize>,
    pub received: mpsc::UnboundedReceiver<String>,
    pub push: broadcast::Sender<String>,
    kick: broadcast::Sender<()>,
    pub closes: mpsc::UnboundedReceiver<String>,
}

impl FakeUpstream {
    /// Number of completed WebSocket handshakes so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Drop every open socket from the server side.
    pub fn kick_all(&self) {
        let _ = self.kick.send(());
    }
}

pub(crate) async fn spawn_fake_upstream() -> FakeUpstream {
    let connections = Arc::new(AtomicUsize::new(0));
    let (received_tx, received_rx) = mpsc::unbounded_channel();
    let (push_tx, _) = broadcast::channel(64);
    let (kick_tx, _) = broadcast::channel(4);
    let (closes_tx, closes_rx) = mpsc::unbounded_channel();

    let state = UpstreamState {
        connections: Arc::clone(&connections),
        received: received_tx,
        push: push_tx.clone(),
        kick: kick_tx.clone(),
        closes: closes_tx,
    };
    let app = Router::new().route("/", any(ws_handler)).with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _ = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    FakeUpstream {
        port,
        connections,
        received: received_rx,
        push: push_tx,
        kick: kick_tx,
        closes: closes_rx,
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<UpstreamState>) -> impl IntoResponse {
    state.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: UpstreamState) {
    let (mut tx, mut rx) = socket.split();
    let mut push_rx = state.push.subscribe();
    let mut kick_rx = state.kick.subscribe();
    loop {
        tokio::select! {
            msg = rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = state.received.send(text.to_string());
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    let _ = state.closes.send(reason);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
            out = push_rx.recv() => match out {
                Ok(text) => {
                    if tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            _ = kick_rx.recv() => {
                // Frames the client flushed before the kick may not be
                // readable yet; drain them so a kick cannot drop them.
                while let Ok(Some(Ok(Message::Text(text)))) =
                    tokio::time::timeout(Duration::from_millis(50), rx.next()).await
                {
                    let _ = state.received.send(text.to_string());
                }
                break;
            },
        }
    }
}

/// Plain HTTP server that refuses the WebSocket upgrade, counting attempts.
pub(crate) async fn spawn_rejecting_upstream() -> (u16, Arc<AtomicUsize>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let app = Router::new().fallback(any(
        |State(counter): State<Arc<AtomicUsize>>| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            axum::http::StatusCode::NOT_FOUND
        },
    ))
    .with_state(counter);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _ = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (port, attempts)
}

pub(crate) struct FakeWebhook {
    pub url: String,
    pub received: mpsc::UnboundedReceiver<ForwardPayload>,
}

pub(crate) async fn spawn_fake_webhook() -> FakeWebhook {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route(
            "/stream",
            post(
                |State(tx): State<mpsc::UnboundedSender<ForwardPayload>>,
                 Json(payload): Json<ForwardPayload>| async move {
                    let _ = tx.send(payload);
                    Json(serde_json::json!({"ok": true}))
                },
            ),
        )
        .with_state(tx);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _ = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    FakeWebhook {
        url: format!("http://127.0.0.1:{port}/stream"),
        received: rx,
    }
}

pub(crate) fn endpoint(port: u16) -> UpstreamEndpoint {
    UpstreamEndpoint::new(
        format!("ws://127.0.0.1:{port}/"),
        "agent-1",
        SecretString::from("sk-test"),
    )
}

pub(crate) fn test_config(upstream_port: u16, webhook_url: &str) -> RelayConfig {
    RelayConfig {
        port: 0,
        upstream_url: format!("ws://127.0.0.1:{upstream_port}/"),
        api_key: SecretString::from("sk-test"),
        default_destination: Some("agent-1".into()),
        webhook_url: webhook_url.to_string(),
        idle_window: Duration::from_secs(60),
        ready_timeout: Duration::from_secs(2),
    }
}
