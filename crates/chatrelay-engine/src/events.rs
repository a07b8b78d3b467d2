use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chatrelay_core::{classify, ForwardPayload, OutboundFrame, UpstreamEvent};

use crate::forwarder::Forwarder;
use crate::registry::{SessionEntry, SessionRegistry};

/// One task per session: consumes decoded upstream frames in arrival order,
/// answers keepalives on the same connection, forwards response events to the
/// sink, and evicts the entry once the connection goes away. Events for one
/// session are strictly ordered; sessions run concurrently.
pub(crate) fn spawn_session_loop(
    registry: Weak<SessionRegistry>,
    entry: Arc<SessionEntry>,
    mut events: mpsc::Receiver<serde_json::Value>,
    forwarder: Arc<Forwarder>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = events.recv().await {
            let Some(live_registry) = registry.upgrade() else {
                break;
            };
            live_registry.touch(&entry.key);

            match classify(&frame) {
                UpstreamEvent::KeepalivePing { event_id } => {
                    if let Err(e) = entry.connection.send(&OutboundFrame::pong(event_id)) {
                        tracing::warn!(session_key = %entry.key, error = %e, "Pong reply failed");
                    }
                }
                event @ (UpstreamEvent::Partial { .. } | UpstreamEvent::Final { .. }) => {
                    if let Some(payload) = ForwardPayload::from_event(&entry.key, &event) {
                        forwarder.forward(&payload).await;
                    }
                }
                UpstreamEvent::Ignore => {}
            }
        }

        // Connection closed or errored: evict so the next relay reconnects.
        if let Some(live_registry) = registry.upgrade() {
            live_registry.remove_entry(&entry);
        }
        tracing::info!(session_key = %entry.key, "Session event loop ended");
    })
}
