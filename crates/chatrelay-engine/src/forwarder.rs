use chatrelay_core::{ForwardPayload, RelayError};

/// Fire-and-forget delivery of classified response events to the webhook
/// sink. Failures are logged and swallowed; forwarding never fails or blocks
/// the relay operation that produced the event.
pub struct Forwarder {
    client: reqwest::Client,
    webhook_url: String,
}

impl Forwarder {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
        }
    }

    pub async fn forward(&self, payload: &ForwardPayload) {
        if let Err(e) = self.try_forward(payload).await {
            tracing::warn!(
                session_key = %payload.session_key,
                kind = e.error_kind(),
                error = %e,
                "Dropping forwarded event"
            );
        }
    }

    async fn try_forward(&self, payload: &ForwardPayload) -> Result<(), RelayError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| RelayError::Forward(e.to_string()))?;
        let _ = response
            .error_for_status()
            .map_err(|e| RelayError::Forward(e.to_string()))?;
        Ok(())
    }
}
