use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use chatrelay_core::{OutboundFrame, RelayConfig, RelayError};
use chatrelay_upstream::UpstreamEndpoint;

use crate::registry::{SessionEntry, SessionRegistry};

/// Orchestration entry point for inbound send requests: ensure a live
/// connection for the session, wait for readiness, deliver the one-time init
/// payload at most once, then send the user message.
pub struct RelayDispatcher {
    registry: Arc<SessionRegistry>,
    upstream_url: String,
    api_key: SecretString,
    default_destination: Option<String>,
    ready_timeout: Duration,
}

impl RelayDispatcher {
    pub fn new(registry: Arc<SessionRegistry>, config: &RelayConfig) -> Self {
        Self {
            registry,
            upstream_url: config.upstream_url.clone(),
            api_key: config.api_key.clone(),
            default_destination: config.default_destination.clone(),
            ready_timeout: config.ready_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Deliver one user message on the session's connection. Sequential calls
    /// for one session key are written to the wire in the order their
    /// readiness waits complete.
    pub async fn relay(
        &self,
        session_key: &str,
        text: &str,
        destination: Option<&str>,
        init_payload: Option<serde_json::Value>,
    ) -> Result<(), RelayError> {
        if session_key.is_empty() {
            return Err(RelayError::Validation("sessionKey is required".into()));
        }
        if text.is_empty() {
            return Err(RelayError::Validation("text is required".into()));
        }
        let destination = destination
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_destination.clone())
            .ok_or_else(|| {
                RelayError::Validation("no destination identity available".into())
            })?;

        let endpoint =
            UpstreamEndpoint::new(self.upstream_url.clone(), destination, self.api_key.clone());
        let entry = self.registry.get_or_create(session_key, endpoint);

        entry.connection().await_ready(self.ready_timeout).await?;

        if let Some(init) = init_payload {
            self.deliver_init_once(&entry, &init)?;
        }

        entry.connection().send(&OutboundFrame::user_message(text))?;
        self.registry.touch(session_key);
        Ok(())
    }

    /// Send the opaque init payload verbatim, at most once per connection
    /// lifetime. A replacement connection starts uninitialized again.
    fn deliver_init_once(
        &self,
        entry: &Arc<SessionEntry>,
        init: &serde_json::Value,
    ) -> Result<(), RelayError> {
        if !entry.claim_init() {
            return Ok(());
        }
        if let Err(e) = entry.connection().send(init) {
            // The wire never saw it; allow a later attempt to retry.
            entry.release_init();
            return Err(e);
        }
        tracing::debug!(session_key = %entry.session_key(), "Delivered one-time init payload");
        Ok(())
    }
}
