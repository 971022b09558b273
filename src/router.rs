//! Inbound frame routing
//!
//! Decodes one wire message and classifies it. The router holds no session
//! state beyond the local user name; the session applies each [`Routed`]
//! value in arrival order.

use tracing::{debug, warn};

use crate::message::{AuthResponse, InboundFrame};
use crate::types::AuthKind;

/// What a frame asks the session to do
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Show a system notice
    Notice(String),
    /// Remote user started (or kept) typing
    RemoteTyping { user: String },
    /// Chat line; clears the sender's typing indicator
    Chat { user: String, text: String },
    /// Auth answer for the pending request of `kind`
    AuthResponse {
        kind: Option<AuthKind>,
        response: AuthResponse,
    },
    /// Our own auth request reflected back
    Echo {
        kind: AuthKind,
        nickname: String,
        request_id: Option<String>,
    },
    /// Nothing to do
    Ignored,
}

/// Classifies inbound frames
#[derive(Debug, Default)]
pub struct MessageRouter {
    local_user: Option<String>,
}

impl MessageRouter {
    /// Create a router with no local identity
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or clear) the name our own frames carry
    pub fn set_local_user(&mut self, user: Option<String>) {
        self.local_user = user;
    }

    /// Decode and classify one wire message
    ///
    /// Malformed JSON is logged and ignored, never propagated.
    pub fn on_frame(&self, raw: &str) -> Routed {
        match InboundFrame::decode(raw) {
            Ok(frame) => self.route(frame),
            Err(e) => {
                warn!("Dropping malformed frame ({}): {}", e, raw);
                Routed::Ignored
            }
        }
    }

    /// Classify a decoded frame
    ///
    /// `legacy_auth_response` carries no kind; the session resolves it
    /// against whichever request is pending.
    pub fn route(&self, frame: InboundFrame) -> Routed {
        match frame {
            InboundFrame::Join { user } => Routed::Notice(format!("{} joined", user)),
            InboundFrame::System { text } => {
                Routed::Notice(text.unwrap_or_else(|| "System message".to_string()))
            }
            InboundFrame::Typing { user } => {
                if self.local_user.as_deref() == Some(user.as_str()) {
                    Routed::Ignored
                } else {
                    Routed::RemoteTyping { user }
                }
            }
            InboundFrame::Message { user, text } => Routed::Chat { user, text },
            InboundFrame::LoginResponse(response) => Routed::AuthResponse {
                kind: Some(AuthKind::Login),
                response,
            },
            InboundFrame::RegisterResponse(response) => Routed::AuthResponse {
                kind: Some(AuthKind::Register),
                response,
            },
            InboundFrame::LegacyAuthResponse(response) => Routed::AuthResponse {
                kind: None,
                response,
            },
            InboundFrame::Login {
                nickname,
                request_id,
            } => Routed::Echo {
                kind: AuthKind::Login,
                nickname,
                request_id,
            },
            InboundFrame::Register {
                nickname,
                request_id,
            } => Routed::Echo {
                kind: AuthKind::Register,
                nickname,
                request_id,
            },
            InboundFrame::Unknown => {
                debug!("Ignoring frame of unrecognised type");
                Routed::Ignored
            }
        }
    }
}
