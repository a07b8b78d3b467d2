use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames written to the upstream socket.
/// The one-time init payload is not modeled here: it is opaque JSON passed
/// through verbatim.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    UserMessage {
        text: String,
    },
}

impl OutboundFrame {
    pub fn pong(event_id: Option<String>) -> Self {
        Self::Pong { event_id }
    }

    pub fn user_message(text: impl Into<String>) -> Self {
        Self::UserMessage { text: text.into() }
    }
}

/// Semantic kind of one decoded upstream frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Keepalive ping; must be answered with a pong echoing the correlation id.
    KeepalivePing { event_id: Option<String> },
    /// Tentative in-progress agent utterance.
    Partial { text: String },
    /// Finalized agent utterance.
    Final { text: String },
    /// Malformed, empty, or recognized-but-irrelevant (e.g. audio chunks).
    Ignore,
}

/// Classify one decoded upstream frame. Pure; rules are checked in order and
/// the first match wins. Empty or absent response text suppresses the event.
pub fn classify(frame: &Value) -> UpstreamEvent {
    let kind = frame.get("type").and_then(Value::as_str);

    // Some ping events carry the marker object without the type discriminator.
    if kind == Some("ping") || frame.get("ping_event").is_some() {
        let event_id = frame
            .get("ping_event")
            .and_then(|p| p.get("event_id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return UpstreamEvent::KeepalivePing { event_id };
    }

    match kind {
        Some("internal_tentative_agent_response") => nested_text(
            frame,
            "tentative_agent_response_internal_event",
            "tentative_agent_response",
        )
        .map_or(UpstreamEvent::Ignore, |text| UpstreamEvent::Partial { text }),
        Some("agent_response") => nested_text(frame, "agent_response_event", "agent_response")
            .map_or(UpstreamEvent::Ignore, |text| UpstreamEvent::Final { text }),
        _ => UpstreamEvent::Ignore,
    }
}

fn nested_text(frame: &Value, outer: &str, inner: &str) -> Option<String> {
    let text = frame.get(outer)?.get(inner)?.as_str()?;
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Webhook body for a forwarded response event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardPayload {
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    #[serde(rename = "type")]
    pub kind: ForwardKind,
    pub text: String,
    #[serde(rename = "final")]
    pub is_final: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardKind {
    Partial,
    Final,
}

impl ForwardPayload {
    /// Build the webhook body for a response event; `None` for kinds that are
    /// not forwarded.
    pub fn from_event(session_key: &str, event: &UpstreamEvent) -> Option<Self> {
        match event {
            UpstreamEvent::Partial { text } => Some(Self {
                session_key: session_key.to_string(),
                kind: ForwardKind::Partial,
                text: text.clone(),
                is_final: false,
            }),
            UpstreamEvent::Final { text } => Some(Self {
                session_key: session_key.to_string(),
                kind: ForwardKind::Final,
                text: text.clone(),
                is_final: true,
            }),
            UpstreamEvent::KeepalivePing { .. } | UpstreamEvent::Ignore => None,
        }
    }
}
