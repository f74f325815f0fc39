/// Shared error type used across all aviary crates.
///
/// Variants map onto the propagation policy: `Validation` and `Permission`
/// are never retried, `Transport` may be retried with bounded attempts,
/// `Persistence` is best-effort and must never block the user-facing
/// response path.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("permission: {0}")]
    Permission(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("session {session_id}: {message}")]
    Session { session_id: String, message: String },

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a caller may retry the failed operation (idempotent ops only).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout(_))
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn session(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Session {
            session_id: session_id.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_timeout_are_retryable() {
        assert!(Error::Transport("reset".into()).is_retryable());
        assert!(Error::Timeout("llm".into()).is_retryable());
    }

    #[test]
    fn validation_and_permission_are_not_retryable() {
        assert!(!Error::Validation("bad input".into()).is_retryable());
        assert!(!Error::Permission("not admin".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn provider_error_display() {
        let e = Error::provider("openai", "quota exceeded");
        assert_eq!(e.to_string(), "provider openai: quota exceeded");
    }
}
