//! Message protocol definitions
//!
//! JSON-based bidirectional frame protocol using Serde's tagged enum
//! for type-safe serialization/deserialization. One JSON object per frame.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Client → Server frame
///
/// All frames this client sends. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Announce ourselves on a freshly opened connection
    Join { user: String, token: String },
    /// Log in with an existing account
    Login {
        nickname: String,
        password: String,
        request_id: String,
    },
    /// Create an account
    Register {
        nickname: String,
        display_name: String,
        password: String,
        request_id: String,
    },
    /// Chat content
    Message {
        user: String,
        text: String,
        token: String,
    },
    /// Ephemeral typing signal, no ack
    Typing { user: String, token: String },
    /// Admin action, no defined response
    ClearHistory { user: String, token: String },
}

impl ClientFrame {
    /// Serialize to the wire representation
    pub fn to_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server → Client frame
///
/// Everything the router understands. Unknown `type` values decode to
/// `Unknown`; a missing `type` or non-object payload is a decode error.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Someone joined
    Join {
        #[serde(default)]
        user: String,
    },
    /// Server-originated announcement
    System {
        #[serde(default)]
        text: Option<String>,
    },
    /// Remote user is typing
    Typing {
        #[serde(default)]
        user: String,
    },
    /// Chat content
    Message {
        #[serde(default)]
        user: String,
        #[serde(default)]
        text: String,
    },
    /// Answer to a login request
    LoginResponse(AuthResponse),
    /// Answer to a register request
    RegisterResponse(AuthResponse),
    /// Older servers answer both kinds with this
    #[serde(rename = "auth_response")]
    LegacyAuthResponse(AuthResponse),
    /// A login request reflected back by a broadcasting server
    Login {
        #[serde(default)]
        nickname: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    /// A register request reflected back by a broadcasting server
    Register {
        #[serde(default)]
        nickname: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Decode one wire message
    pub fn decode(raw: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Body of `login_response` / `register_response` / `auth_response`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuthResponse {
    pub success: bool,
    pub token: Option<String>,
    pub display_name: Option<String>,
    pub nickname: Option<String>,
    pub error: Option<String>,
    pub request_id: Option<String>,
}

impl AuthResponse {
    /// Reason to show when the server said no
    pub fn failure_reason(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "Authentication failed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_frame_serialize() {
        let frame = ClientFrame::Login {
            nickname: "bob".to_string(),
            password: "pw1".to_string(),
            request_id: "r1".to_string(),
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"type\":\"login\""));
        assert!(json.contains("\"nickname\":\"bob\""));
        assert!(json.contains("\"request_id\":\"r1\""));
    }

    #[test]
    fn test_clear_history_serialize() {
        let frame = ClientFrame::ClearHistory {
            user: "Bob".to_string(),
            token: "t".to_string(),
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"type\":\"clear_history\""));
    }

    #[test]
    fn test_login_response_deserialize() {
        let json = r#"{"type":"login_response","success":true,"token":"abc.def.ghi","display_name":"Bob"}"#;
        match InboundFrame::decode(json).unwrap() {
            InboundFrame::LoginResponse(resp) => {
                assert!(resp.success);
                assert_eq!(resp.token.as_deref(), Some("abc.def.ghi"));
                assert_eq!(resp.display_name.as_deref(), Some("Bob"));
                assert!(resp.error.is_none());
            }
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_legacy_auth_response_deserialize() {
        let json = r#"{"type":"auth_response","success":false,"error":"bad password"}"#;
        match InboundFrame::decode(json).unwrap() {
            InboundFrame::LegacyAuthResponse(resp) => {
                assert!(!resp.success);
                assert_eq!(resp.failure_reason(), "bad password");
            }
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let json = r#"{"type":"clear_history","user":"Ann","token":"x"}"#;
        assert_eq!(InboundFrame::decode(json).unwrap(), InboundFrame::Unknown);
    }

    #[test]
    fn test_extra_fields_ignored() {
        let json = r#"{"type":"message","user":"Ann","text":"hi","token":"secret"}"#;
        assert_eq!(
            InboundFrame::decode(json).unwrap(),
            InboundFrame::Message {
                user: "Ann".to_string(),
                text: "hi".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        assert!(matches!(
            InboundFrame::decode("{not json"),
            Err(SessionError::Json(_))
        ));
        assert!(InboundFrame::decode(r#"{"user":"no type"}"#).is_err());
    }
}
