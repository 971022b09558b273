//! View-layer callback surface
//!
//! The engine reports everything user-visible through [`View`]. Rendering
//! is not this crate's business; [`ChannelView`] forwards each callback as a
//! [`ViewEvent`] over an mpsc channel so a front end can consume them on its
//! own task.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::session::SessionState;

/// Callbacks implemented by the front end
pub trait View {
    fn on_system_notice(&mut self, text: &str);
    fn on_chat_message(&mut self, user: &str, text: &str, received_at: DateTime<Utc>);
    fn on_typing_start(&mut self, user: &str);
    fn on_typing_stop(&mut self, user: &str);
    fn on_auth_result(&mut self, success: bool, error: Option<&str>);
    fn on_connection_state_change(&mut self, state: SessionState);
}

/// One view callback as a value
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    SystemNotice(String),
    ChatMessage {
        user: String,
        text: String,
        received_at: DateTime<Utc>,
    },
    TypingStart(String),
    TypingStop(String),
    AuthResult {
        success: bool,
        error: Option<String>,
    },
    StateChange(SessionState),
}

/// View that forwards callbacks over a channel
#[derive(Debug, Clone)]
pub struct ChannelView {
    sender: mpsc::UnboundedSender<ViewEvent>,
}

impl ChannelView {
    /// Create a view and the receiver its events arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ViewEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn emit(&self, event: ViewEvent) {
        if self.sender.send(event).is_err() {
            debug!("View receiver dropped, discarding event");
        }
    }
}

impl View for ChannelView {
    fn on_system_notice(&mut self, text: &str) {
        self.emit(ViewEvent::SystemNotice(text.to_string()));
    }

    fn on_chat_message(&mut self, user: &str, text: &str, received_at: DateTime<Utc>) {
        self.emit(ViewEvent::ChatMessage {
            user: user.to_string(),
            text: text.to_string(),
            received_at,
        });
    }

    fn on_typing_start(&mut self, user: &str) {
        self.emit(ViewEvent::TypingStart(user.to_string()));
    }

    fn on_typing_stop(&mut self, user: &str) {
        self.emit(ViewEvent::TypingStop(user.to_string()));
    }

    fn on_auth_result(&mut self, success: bool, error: Option<&str>) {
        self.emit(ViewEvent::AuthResult {
            success,
            error: error.map(str::to_string),
        });
    }

    fn on_connection_state_change(&mut self, state: SessionState) {
        self.emit(ViewEvent::StateChange(state));
    }
}
