use std::fmt;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use chatrelay_core::RelayError;

const OUTBOUND_QUEUE: usize = 64;
const INBOUND_QUEUE: usize = 256;

/// Readiness of one upstream connection.
///
/// Transitions: `Connecting -> Open -> Closed`, or `Connecting -> Failed`.
/// No transition out of a terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where and how to reach the remote conversational-agent service.
#[derive(Clone, Debug)]
pub struct UpstreamEndpoint {
    pub url: String,
    pub destination_id: String,
    pub api_key: SecretString,
}

impl UpstreamEndpoint {
    pub fn new(
        url: impl Into<String>,
        destination_id: impl Into<String>,
        api_key: SecretString,
    ) -> Self {
        Self {
            url: url.into(),
            destination_id: destination_id.into(),
            api_key,
        }
    }

    fn client_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, RelayError> {
        let destination = utf8_percent_encode(&self.destination_id, NON_ALPHANUMERIC);
        let url = format!("{}?agent_id={destination}", self.url);
        let mut request = url
            .into_client_request()
            .map_err(|e| RelayError::Connect(format!("bad upstream url: {e}")))?;
        let key = HeaderValue::from_str(self.api_key.expose_secret())
            .map_err(|_| RelayError::Connect("api key is not a valid header value".into()))?;
        let _ = request.headers_mut().insert("xi-api-key", key);
        Ok(request)
    }
}

enum Outbound {
    Frame(String),
    Close(String),
}

/// Cheap cloneable handle to one live upstream streaming connection.
///
/// The socket itself is owned by a single I/O task; the handle talks to it
/// over channels. Dropping every handle (and the inbound receiver) ends the
/// I/O task.
#[derive(Clone)]
pub struct UpstreamConnection {
    outbound: mpsc::Sender<Outbound>,
    state: watch::Receiver<ConnectionState>,
}

impl UpstreamConnection {
    /// Start connecting to the endpoint. Returns immediately with the handle
    /// and the inbound frame receiver; callers await readiness separately.
    /// Decoded inbound frames are delivered in arrival order.
    pub fn connect(endpoint: UpstreamEndpoint) -> (Self, mpsc::Receiver<serde_json::Value>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let _ = tokio::spawn(run_io(endpoint, state_tx, outbound_rx, inbound_tx));

        (
            Self {
                outbound: outbound_tx,
                state: state_rx,
            },
            inbound_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue one frame for delivery. Fails unless the connection is open.
    /// Frames from sequential sends are written to the socket in order.
    pub fn send<T: Serialize>(&self, frame: &T) -> Result<(), RelayError> {
        if !self.is_open() {
            return Err(RelayError::Send(format!(
                "connection is {}, not open",
                self.state()
            )));
        }
        let json =
            serde_json::to_string(frame).map_err(|e| RelayError::Send(e.to_string()))?;
        self.outbound
            .try_send(Outbound::Frame(json))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    RelayError::Send("outbound queue full".into())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    RelayError::Send("connection task ended".into())
                }
            })
    }

    /// Request a graceful close with the given reason (e.g. "idle-timeout").
    /// Best-effort; a connection that is already down needs no close frame.
    pub fn close(&self, reason: &str) {
        let _ = self.outbound.try_send(Outbound::Close(reason.to_string()));
    }

    /// Suspend until the connection reaches `Open`. Fails with `Connect` if it
    /// reaches a terminal state first, or `Timeout` after `timeout` elapses.
    /// Returns immediately when already open.
    pub async fn await_ready(&self, timeout: Duration) -> Result<(), RelayError> {
        let mut state = self.state.clone();
        let wait = async move {
            loop {
                let current = *state.borrow_and_update();
                match current {
                    ConnectionState::Open => return Ok(()),
                    ConnectionState::Connecting => {}
                    terminal => {
                        return Err(RelayError::Connect(format!(
                            "connection {terminal} before becoming ready"
                        )))
                    }
                }
                if state.changed().await.is_err() {
                    return Err(RelayError::Connect("connection task ended".into()));
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout(timeout)),
        }
    }
}

/// Single owner of the socket: handshake, then pump outbound commands and
/// inbound frames until either side goes away.
async fn run_io(
    endpoint: UpstreamEndpoint,
    state_tx: watch::Sender<ConnectionState>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    inbound_tx: mpsc::Sender<serde_json::Value>,
) {
    let request = match endpoint.client_request() {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(destination = %endpoint.destination_id, error = %e, "Upstream request invalid");
            let _ = state_tx.send(ConnectionState::Failed);
            return;
        }
    };

    let stream = match connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::warn!(destination = %endpoint.destination_id, error = %e, "Upstream handshake failed");
            let _ = state_tx.send(ConnectionState::Failed);
            return;
        }
    };

    let _ = state_tx.send(ConnectionState::Open);
    tracing::info!(destination = %endpoint.destination_id, "Upstream connection open");

    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            cmd = outbound_rx.recv() => match cmd {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::warn!(error = %e, "Upstream write failed");
                        break;
                    }
                }
                Some(Outbound::Close(reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                // All handles dropped.
                None => break,
            },
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<serde_json::Value>(text.as_str()) {
                        Ok(value) => {
                            if inbound_tx.send(value).await.is_err() {
                                // Consumer gone; nothing left to deliver to.
                                break;
                            }
                        }
                        // Malformed frames are dropped, not an error.
                        Err(_) => tracing::debug!("Dropping undecodable upstream frame"),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "Upstream sent close");
                    break;
                }
                // Ping/pong are answered by the protocol layer; binary is unused.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Upstream connection error");
                    break;
                }
                None => break,
            }
        }
    }

    let _ = state_tx.send(ConnectionState::Closed);
}
