use std::io;
use thiserror::Error;

/// Errors surfaced by the Rich Presence client.
///
/// API validation errors are raised synchronously from the calling thread.
/// Transport and protocol failures never escape the engine as errors; they
/// are absorbed, logged, and surfaced as [`crate::Message`] values instead.
#[derive(Error, Debug)]
pub enum DiscordRpcError {
    #[error("client has not been initialized")]
    Uninitialized,

    #[error("client has already been initialized")]
    AlreadyInitialized,

    #[error("client has been disposed")]
    Disposed,

    #[error("invalid rich presence: {0}")]
    BadPresence(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{field} must be {max} bytes or less")]
    StringOutOfRange { field: &'static str, max: usize },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("discord returned error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("failed to serialize JSON payload")]
    Serialization(#[from] serde_json::Error),

    #[error("pipe I/O failed")]
    Io(#[from] io::Error),
}

impl DiscordRpcError {
    /// Build a [`DiscordRpcError::Server`] from an error envelope.
    pub fn server(code: i64, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    /// Whether the connection engine may recover from this error by
    /// recycling the pipe and reconnecting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Protocol(_) | Self::Io(_))
    }
}

/// Result type for Rich Presence operations
pub type Result<T = ()> = std::result::Result<T, DiscordRpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_recoverable() {
        assert!(DiscordRpcError::Transport("pipe gone".into()).is_recoverable());
        assert!(DiscordRpcError::Protocol("bad frame".into()).is_recoverable());
    }

    #[test]
    fn validation_errors_are_not_recoverable() {
        assert!(!DiscordRpcError::Uninitialized.is_recoverable());
        assert!(!DiscordRpcError::BadPresence("too long".into()).is_recoverable());
        assert!(!DiscordRpcError::server(4000, "bad client id").is_recoverable());
    }
}
