//! Error types for the client engine

use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client engine
///
/// Errors tied to a single command reach only that command's caller.
/// Connection-level errors fail every outstanding command.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A frame did not decode or arrived out of the expected sequence
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The hub rejected the access token
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// The command referenced a resource that does not exist
    #[error("not found: {message}")]
    NotFound { message: String },

    /// The hub answered the command with `success: false`
    #[error("command failed ({code}): {message}")]
    CommandFailed { code: String, message: String },

    /// The connection closed before the command was answered
    #[error("connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// No result arrived within the configured command timeout
    #[error("command {id} timed out")]
    Timeout { id: u64 },

    /// The underlying transport failed
    #[error("transport error: {0}")]
    Transport(String),

    /// The command payload is not an object with a string `type`
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Failed to (de)serialize a payload
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Build the error for a failed command result from its error code
    pub fn from_result_error(code: &str, message: &str) -> Self {
        match code {
            "not_found" => Self::NotFound {
                message: message.to_string(),
            },
            _ => Self::CommandFailed {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }

    /// Whether this error ends the connection rather than a single command
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::Authentication { .. }
                | Self::ConnectionClosed { .. }
                | Self::Transport(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
