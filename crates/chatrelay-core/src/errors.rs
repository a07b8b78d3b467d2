use std::time::Duration;

/// Typed error hierarchy for relay operations.
/// Classifies failures as user-correctable (rejected with 400) or
/// delivery/infrastructure problems (rejected with 500).
#[derive(Clone, Debug, thiserror::Error)]
pub enum RelayError {
    // User-correctable
    #[error("invalid request: {0}")]
    Validation(String),

    // Delivery
    #[error("upstream connect failed: {0}")]
    Connect(String),
    #[error("upstream not ready after {0:?}")]
    Timeout(Duration),
    #[error("upstream send failed: {0}")]
    Send(String),

    // Never propagated past the forwarder; exists for uniform logging.
    #[error("webhook forward failed: {0}")]
    Forward(String),

    // Startup
    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// True when the caller supplied a bad request and can fix it themselves.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Connect(_) => "connect",
            Self::Timeout(_) => "timeout",
            Self::Send(_) => "send",
            Self::Forward(_) => "forward",
            Self::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_is_user_error() {
        assert!(RelayError::Validation("sessionKey is required".into()).is_user_error());
        assert!(!RelayError::Connect("refused".into()).is_user_error());
        assert!(!RelayError::Timeout(Duration::from_secs(10)).is_user_error());
        assert!(!RelayError::Send("not open".into()).is_user_error());
        assert!(!RelayError::Forward("503".into()).is_user_error());
        assert!(!RelayError::Config("WEBHOOK_URL missing".into()).is_user_error());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(RelayError::Validation("x".into()).error_kind(), "validation");
        assert_eq!(RelayError::Connect("x".into()).error_kind(), "connect");
        assert_eq!(
            RelayError::Timeout(Duration::from_secs(1)).error_kind(),
            "timeout"
        );
        assert_eq!(RelayError::Send("x".into()).error_kind(), "send");
        assert_eq!(RelayError::Forward("x".into()).error_kind(), "forward");
        assert_eq!(RelayError::Config("x".into()).error_kind(), "config");
    }

    #[test]
    fn display_messages() {
        let err = RelayError::Validation("text is required".into());
        assert_eq!(err.to_string(), "invalid request: text is required");

        let err = RelayError::Timeout(Duration::from_secs(10));
        assert!(err.to_string().contains("10s"));
    }
}
