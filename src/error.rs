//! Error types for the chat session engine
//!
//! Defines session-level errors, local input validation errors and token
//! decode errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::AuthKind;

/// Session-level errors
///
/// Nothing here is fatal to the process: every variant resolves to a state
/// transition plus something the view layer can show.
#[derive(Debug, Error)]
pub enum SessionError {
    /// WebSocket protocol error (transport, triggers reconnect scheduling)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Malformed frame (logged and dropped, connection stays open)
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (credential file access)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (runtime actor gone)
    #[error("Channel send error")]
    ChannelSend,

    /// No open connection to send on
    #[error("Not connected")]
    NotConnected,

    /// Nothing cached to connect with
    #[error("No stored credential")]
    NoCredential,

    /// Cached token expired (detected locally, never sent to the server)
    #[error("Token expired")]
    TokenExpired,

    /// Server refused the login or registration
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// No response to an auth request within the wait window
    #[error("{0} request timed out")]
    AuthTimeout(AuthKind),

    /// A request of this kind is already in flight
    #[error("{0} request already pending")]
    AuthPending(AuthKind),

    /// Local validation failed before anything reached the wire
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl SessionError {
    /// Whether the failure is transient and worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::WebSocket(_)
                | SessionError::Io(_)
                | SessionError::NotConnected
                | SessionError::AuthTimeout(_)
        )
    }
}

/// Local input validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field was blank
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// Handle contains characters outside `[A-Za-z0-9_]`
    #[error("Login may contain only letters, digits and underscores")]
    InvalidHandle,

    /// Password and confirmation differ
    #[error("Passwords do not match")]
    PasswordMismatch,
}

/// Token decode errors
///
/// Only surfaced to logs; the expiry check always resolves to a bool.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Not three dot-separated segments
    #[error("token is not three dot-separated segments")]
    Malformed,

    /// Payload segment is not base64url
    #[error("payload is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Payload is not a JSON claims object
    #[error("payload is not a claims object: {0}")]
    Claims(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message() {
        let err: SessionError = ValidationError::EmptyField("password").into();
        assert_eq!(err.to_string(), "password must not be empty");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SessionError::NotConnected.is_retryable());
        assert!(SessionError::AuthTimeout(AuthKind::Login).is_retryable());
        assert!(!SessionError::TokenExpired.is_retryable());
        assert!(!SessionError::AuthRejected("nope".to_string()).is_retryable());
    }

    #[test]
    fn test_auth_pending_display() {
        let err = SessionError::AuthPending(AuthKind::Register);
        assert_eq!(err.to_string(), "register request already pending");
    }
}
