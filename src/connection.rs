//! Connection supervision
//!
//! Owns the single live transport connection and the reconnect timer. The
//! supervisor never touches a socket: it emits [`TransportCommand`]s for the
//! runtime to execute and consumes transport events tagged with the
//! [`ConnectionId`] they came from.
//!
//! Superseding a connection (dialing again, or shutting down) retires its id,
//! so late open/close/error/frame events from the old socket are dropped here
//! and can never schedule a second reconnect or reach the auth flow.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialStore};
use crate::error::SessionError;
use crate::message::ClientFrame;
use crate::types::ConnectionId;

/// Lifecycle of the current connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// I/O the runtime must perform on the supervisor's behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// Open a socket and report events under `conn`
    Dial { conn: ConnectionId, url: String },
    /// Write one text frame
    Send { conn: ConnectionId, text: String },
    /// Close the socket and stop reporting its events
    Close { conn: ConnectionId },
}

/// Owner of the transport connection
#[derive(Debug)]
pub struct ConnectionSupervisor {
    url: String,
    reconnect_delay: Duration,
    state: ConnectionState,
    current: Option<ConnectionId>,
    last_id: ConnectionId,
    reconnect_at: Option<Instant>,
    outbox: Vec<TransportCommand>,
}

impl ConnectionSupervisor {
    /// Create an idle supervisor
    pub fn new(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
            state: ConnectionState::Idle,
            current: None,
            last_id: ConnectionId(0),
            reconnect_at: None,
            outbox: Vec::new(),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Id of the live connection, if any
    pub fn current(&self) -> Option<ConnectionId> {
        self.current
    }

    /// Whether `conn` is the live connection
    pub fn is_current(&self, conn: ConnectionId) -> bool {
        self.current == Some(conn)
    }

    /// Whether a connection is open or on its way
    pub fn is_live(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        )
    }

    /// Whether frames can be sent right now
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Pending reconnect deadline
    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Dial with the cached credential
    ///
    /// Fails fast with `NoCredential` or `TokenExpired` without dialing;
    /// the caller is expected to log out on either.
    pub fn connect(&mut self, store: &dyn CredentialStore) -> Result<ConnectionId, SessionError> {
        let Some(credential) = store.load() else {
            debug!("Connect skipped: no stored credential");
            return Err(SessionError::NoCredential);
        };
        self.connect_as(&credential, store)
    }

    /// Dial with a credential already held in memory
    ///
    /// `store` only supplies the expiry policy.
    pub fn connect_as(
        &mut self,
        credential: &Credential,
        store: &dyn CredentialStore,
    ) -> Result<ConnectionId, SessionError> {
        if store.is_expired(credential) {
            info!("Connect skipped: token for {} expired", credential.login_handle);
            return Err(SessionError::TokenExpired);
        }
        Ok(self.dial())
    }

    /// Dial without a credential (auth requests travel on this connection)
    pub fn open_anonymous(&mut self) -> ConnectionId {
        self.dial()
    }

    fn dial(&mut self) -> ConnectionId {
        self.retire_current();
        self.reconnect_at = None;

        let conn = self.last_id.next();
        self.last_id = conn;
        self.current = Some(conn);
        self.state = ConnectionState::Connecting;

        info!("Dialing {} as {}", self.url, conn);
        self.outbox.push(TransportCommand::Dial {
            conn,
            url: self.url.clone(),
        });
        conn
    }

    /// Close the live connection, if any, and forget its id
    fn retire_current(&mut self) {
        if let Some(old) = self.current.take() {
            debug!("Retiring {}", old);
            self.outbox.push(TransportCommand::Close { conn: old });
        }
    }

    /// Transport reported the socket open
    ///
    /// Returns false for superseded connections.
    pub fn on_open(&mut self, conn: ConnectionId) -> bool {
        if !self.is_current(conn) {
            debug!("Ignoring open from stale {}", conn);
            return false;
        }
        info!("{} open", conn);
        self.state = ConnectionState::Open;
        true
    }

    /// Transport reported an error
    ///
    /// Moves toward `Closed` but does not reconnect; the close that follows
    /// does. Returns false for superseded connections.
    pub fn on_error(&mut self, conn: ConnectionId) -> bool {
        if !self.is_current(conn) {
            debug!("Ignoring error from stale {}", conn);
            return false;
        }
        self.state = ConnectionState::Closing;
        true
    }

    /// Transport reported the socket closed
    ///
    /// Schedules exactly one reconnect `reconnect_delay` after `now`. Returns
    /// false when the event is stale or a reconnect is already scheduled.
    pub fn on_close(&mut self, conn: ConnectionId, now: Instant) -> bool {
        if !self.is_current(conn) {
            debug!("Ignoring close from stale {}", conn);
            return false;
        }
        self.state = ConnectionState::Closed;

        if self.reconnect_at.is_some() {
            debug!("Reconnect already scheduled, ignoring close of {}", conn);
            return false;
        }

        // no backoff growth and no attempt ceiling
        let at = now + self.reconnect_delay;
        info!("{} closed, reconnecting in {:?}", conn, self.reconnect_delay);
        self.reconnect_at = Some(at);
        true
    }

    /// Whether the reconnect timer has fired; consumes it
    pub fn take_due_reconnect(&mut self, now: Instant) -> bool {
        match self.reconnect_at {
            Some(at) if at <= now => {
                self.reconnect_at = None;
                true
            }
            _ => false,
        }
    }

    /// Serialize and queue a frame on the open connection
    pub fn send(&mut self, frame: &ClientFrame) -> Result<(), SessionError> {
        let conn = match self.current {
            Some(conn) if self.state == ConnectionState::Open => conn,
            _ => return Err(SessionError::NotConnected),
        };
        let text = frame.to_json()?;
        debug!("Sending on {}: {}", conn, text);
        self.outbox.push(TransportCommand::Send { conn, text });
        Ok(())
    }

    /// Close without scheduling a reconnect; back to `Idle`
    pub fn shutdown(&mut self) {
        if self.current.is_some() {
            warn!("Shutting down connection without reconnect");
        }
        self.retire_current();
        self.reconnect_at = None;
        self.state = ConnectionState::Idle;
    }

    /// Take the queued transport commands
    pub fn drain_commands(&mut self) -> Vec<TransportCommand> {
        std::mem::take(&mut self.outbox)
    }
}
