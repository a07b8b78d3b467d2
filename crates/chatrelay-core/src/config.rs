use std::time::Duration;

use secrecy::SecretString;

use crate::errors::RelayError;

/// Default upstream conversation endpoint. Overridable via `UPSTREAM_URL`.
pub const DEFAULT_UPSTREAM_URL: &str = "wss://api.elevenlabs.io/v1/convai/conversation";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_IDLE_MINUTES: u64 = 7;
const DEFAULT_READY_TIMEOUT_SECS: u64 = 10;

/// Process configuration, loaded from environment variables at startup.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// HTTP listen port (`PORT`).
    pub port: u16,
    /// Upstream WSS endpoint (`UPSTREAM_URL`).
    pub upstream_url: String,
    /// Static API key sent on every upstream handshake (`UPSTREAM_API_KEY`).
    pub api_key: SecretString,
    /// Fallback destination identity when a request omits one
    /// (`DEFAULT_DESTINATION_ID`).
    pub default_destination: Option<String>,
    /// Webhook sink for forwarded response events (`WEBHOOK_URL`).
    pub webhook_url: String,
    /// Inactivity window after which a session is evicted (`IDLE_MINUTES`).
    pub idle_window: Duration,
    /// Bound on the connection readiness wait (`READY_TIMEOUT_SECS`).
    pub ready_timeout: Duration,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an injectable variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RelayError> {
        let api_key = required(&lookup, "UPSTREAM_API_KEY")?;
        let webhook_url = required(&lookup, "WEBHOOK_URL")?;

        let port = parse_number(&lookup, "PORT", DEFAULT_PORT)?;
        let idle_minutes = parse_number(&lookup, "IDLE_MINUTES", DEFAULT_IDLE_MINUTES)?;
        let ready_secs = parse_number(&lookup, "READY_TIMEOUT_SECS", DEFAULT_READY_TIMEOUT_SECS)?;

        Ok(Self {
            port,
            upstream_url: lookup("UPSTREAM_URL")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string()),
            api_key: SecretString::from(api_key),
            default_destination: lookup("DEFAULT_DESTINATION_ID").filter(|v| !v.is_empty()),
            webhook_url,
            idle_window: Duration::from_secs(idle_minutes * 60),
            ready_timeout: Duration::from_secs(ready_secs),
        })
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, RelayError> {
    lookup(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RelayError::Config(format!("{key} is required")))
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, RelayError> {
    match lookup(key) {
        Some(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|_| RelayError::Config(format!("{key} is not a valid number: {raw}"))),
        _ => Ok(default),
    }
}
