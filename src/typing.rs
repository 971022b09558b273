//! Typing indicator coalescing
//!
//! Local half: one outbound `typing` frame per idle window, however many
//! keystrokes land in it. Remote half: one indicator per remote user, expiring
//! unless refreshed by another `typing` frame; a `message` from the user
//! clears it at once.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::connection::ConnectionSupervisor;
use crate::error::SessionError;
use crate::message::ClientFrame;

/// Debounces local typing and expires remote indicators
#[derive(Debug)]
pub struct TypingCoalescer {
    idle_window: Duration,
    remote_expiry: Duration,
    /// Set while the current window's announcement is out
    announced_until: Option<Instant>,
    remote: HashMap<String, Instant>,
}

impl TypingCoalescer {
    /// Create a coalescer with the given local window and remote expiry
    pub fn new(idle_window: Duration, remote_expiry: Duration) -> Self {
        Self {
            idle_window,
            remote_expiry,
            announced_until: None,
            remote: HashMap::new(),
        }
    }

    /// Whether a typing frame went out in the current window
    pub fn is_announced(&self, now: Instant) -> bool {
        self.announced_until.is_some_and(|until| until > now)
    }

    /// Local input changed; announce if this window has not been announced
    ///
    /// Returns whether a frame was sent. A send failure leaves the flag clear
    /// so the next keystroke tries again.
    pub fn on_local_input(
        &mut self,
        now: Instant,
        user: &str,
        token: &str,
        supervisor: &mut ConnectionSupervisor,
    ) -> Result<bool, SessionError> {
        if self.is_announced(now) {
            return Ok(false);
        }

        supervisor.send(&ClientFrame::Typing {
            user: user.to_string(),
            token: token.to_string(),
        })?;
        self.announced_until = Some(now + self.idle_window);
        Ok(true)
    }

    /// A chat line went out; the next keystroke announces again
    pub fn on_local_send(&mut self) {
        self.announced_until = None;
    }

    /// Remote user is typing; returns true if the indicator was not showing
    pub fn on_remote_typing(&mut self, user: &str, now: Instant) -> bool {
        let expires_at = now + self.remote_expiry;
        self.remote.insert(user.to_string(), expires_at).is_none()
    }

    /// Remote user sent a message; returns true if an indicator was cleared
    pub fn on_remote_message(&mut self, user: &str) -> bool {
        self.remote.remove(user).is_some()
    }

    /// Whether `user`'s indicator is showing
    pub fn is_remote_typing(&self, user: &str) -> bool {
        self.remote.contains_key(user)
    }

    /// Fire due timers; returns remote users whose indicator expired
    pub fn poll(&mut self, now: Instant) -> Vec<String> {
        if self.announced_until.is_some_and(|until| until <= now) {
            self.announced_until = None;
        }

        let expired: Vec<String> = self
            .remote
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(user, _)| user.clone())
            .collect();
        for user in &expired {
            debug!("Typing indicator for {} expired", user);
            self.remote.remove(user);
        }
        expired
    }

    /// Earliest pending timer
    pub fn next_deadline(&self) -> Option<Instant> {
        self.remote
            .values()
            .copied()
            .chain(self.announced_until)
            .min()
    }

    /// Forget everything; returns users whose indicator was showing
    pub fn reset(&mut self) -> Vec<String> {
        self.announced_until = None;
        self.remote.drain().map(|(user, _)| user).collect()
    }
}
