//! Basic type definitions for the session engine
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: monotonic generation number of a transport connection
//! - `RequestId`: UUID-based correlation tag for auth requests

use uuid::Uuid;

/// Transport connection generation (newtype pattern)
///
/// Every dial gets a fresh, strictly larger id. Events tagged with an id
/// other than the current one belong to a superseded socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// The id that follows this one
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Auth request correlation id (newtype pattern)
///
/// Wraps a UUID v4, sent as `request_id` on login/register frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Create a new random request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Whether a wire value names this request
    pub fn matches(&self, wire: &str) -> bool {
        Uuid::parse_str(wire).is_ok_and(|id| id == self.0)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two auth request kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthKind {
    Login,
    Register,
}

impl std::fmt::Display for AuthKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthKind::Login => write!(f, "login"),
            AuthKind::Register => write!(f, "register"),
        }
    }
}

/// How far a session's identity can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    /// Token issued by the server
    ServerVerified,
    /// Placeholder minted locally by the degraded-mode fallback
    LocalPlaceholder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_monotonic() {
        let first = ConnectionId(1);
        assert!(first.next() > first);
        assert_eq!(first.next().to_string(), "conn#2");
    }

    #[test]
    fn test_request_id_unique() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_request_id_matches_wire() {
        let id = RequestId::new();
        assert!(id.matches(&id.to_string()));
        assert!(!id.matches(&RequestId::new().to_string()));
        assert!(!id.matches("not-a-uuid"));
    }
}
