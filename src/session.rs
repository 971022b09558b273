//! Session controller
//!
//! Top-level state machine. Owns the credential store, the view, and the
//! four protocol components, and is the only thing the runtime talks to.
//! Every input is a method call carrying `now`; transport work accumulates
//! as [`TransportCommand`]s collected with [`SessionController::drain_commands`].
//!
//! States: `LoggedOut → Authenticating → Connected ⇄ Reconnecting`. Only
//! [`SessionController::logout`] (or a locally expired token) returns to
//! `LoggedOut`.

use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::auth::{AuthCallback, AuthFlow, AuthOutcome, AuthRequest, AuthResolution};
use crate::config::SessionConfig;
use crate::connection::{ConnectionState, ConnectionSupervisor, TransportCommand};
use crate::credential::{Credential, CredentialStore};
use crate::error::{SessionError, ValidationError};
use crate::message::ClientFrame;
use crate::router::{MessageRouter, Routed};
use crate::types::{ConnectionId, RequestId, TrustLevel};
use crate::typing::TypingCoalescer;
use crate::view::View;

/// Session lifecycle as the user sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No identity
    LoggedOut,
    /// An auth request is in flight and no identity exists yet
    Authenticating,
    /// Identity known and the connection is open
    Connected,
    /// Identity known, waiting for a connection to (re)open
    Reconnecting,
}

/// Orchestrates credential, connection, auth, routing and typing
#[derive(Debug)]
pub struct SessionController<S, V> {
    store: S,
    view: V,
    supervisor: ConnectionSupervisor,
    auth: AuthFlow,
    router: MessageRouter,
    typing: TypingCoalescer,
    state: SessionState,
    identity: Option<Credential>,
}

impl<S, V> SessionController<S, V>
where
    S: CredentialStore,
    V: View,
{
    /// Create a logged-out controller
    pub fn new(config: &SessionConfig, store: S, view: V) -> Self {
        Self {
            store,
            view,
            supervisor: ConnectionSupervisor::new(config.server_url.clone(), config.reconnect_delay),
            auth: AuthFlow::new(
                config.auth_timeout,
                config.echo_settle_delay,
                config.degraded_auth,
            ),
            router: MessageRouter::new(),
            typing: TypingCoalescer::new(config.typing_idle, config.remote_typing_expiry),
            state: SessionState::LoggedOut,
            identity: None,
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Identity of the session, if authenticated
    pub fn identity(&self) -> Option<&Credential> {
        self.identity.as_ref()
    }

    /// How far the current identity can be trusted
    pub fn trust(&self) -> Option<TrustLevel> {
        self.identity.as_ref().map(Credential::trust)
    }

    /// Credential store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// View
    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    /// Whether `user`'s typing indicator is showing
    pub fn is_remote_typing(&self, user: &str) -> bool {
        self.typing.is_remote_typing(user)
    }

    /// Take the transport work produced so far
    pub fn drain_commands(&mut self) -> Vec<TransportCommand> {
        self.supervisor.drain_commands()
    }

    /// Earliest timer the runtime must wake up for
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.supervisor.reconnect_at(),
            self.auth.next_deadline(),
            self.typing.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Resume the cached session, if there is one
    pub fn start(&mut self) {
        self.resume();
    }

    /// Submit a login or registration
    ///
    /// Validation failures return synchronously and send nothing.
    pub fn submit_auth(
        &mut self,
        request: AuthRequest,
        callback: Option<AuthCallback>,
        now: Instant,
    ) -> Result<RequestId, SessionError> {
        let request_id = self.auth.submit(request, callback, now, &mut self.supervisor)?;
        if self.identity.is_none() {
            self.set_state(SessionState::Authenticating);
        }
        Ok(request_id)
    }

    /// Send a chat line
    pub fn send_message(&mut self, text: &str) -> Result<(), SessionError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyField("message").into());
        }
        let (user, token) = self.authenticated_identity()?;
        self.supervisor.send(&ClientFrame::Message {
            user,
            text: text.to_string(),
            token,
        })?;
        self.typing.on_local_send();
        Ok(())
    }

    /// Local input changed; may announce typing
    ///
    /// Typing is best effort: without an identity or an open connection the
    /// keystroke is simply not announced.
    pub fn input_changed(&mut self, text: &str, now: Instant) {
        if text.trim().is_empty() {
            return;
        }
        let Some(identity) = &self.identity else {
            return;
        };
        if let Err(e) = self.typing.on_local_input(
            now,
            &identity.display_name,
            &identity.token,
            &mut self.supervisor,
        ) {
            debug!("Typing not announced: {}", e);
        }
    }

    /// Ask the server to clear the shared history
    pub fn clear_history(&mut self) -> Result<(), SessionError> {
        let (user, token) = self.authenticated_identity()?;
        self.supervisor.send(&ClientFrame::ClearHistory { user, token })
    }

    /// Forget the credential, close the connection, reset everything
    ///
    /// The only path that drops a live connection without reconnecting.
    pub fn logout(&mut self) {
        info!("Logging out");
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear stored credential: {}", e);
        }
        self.supervisor.shutdown();
        self.auth.reset();
        for user in self.typing.reset() {
            self.view.on_typing_stop(&user);
        }
        self.set_identity(None);
        self.set_state(SessionState::LoggedOut);
    }

    /// Transport opened `conn`
    pub fn on_transport_open(&mut self, conn: ConnectionId) {
        if !self.supervisor.on_open(conn) {
            return;
        }
        if self.identity.is_some() {
            self.send_join();
            self.set_state(SessionState::Connected);
        }
        if let Err(e) = self.auth.flush(&mut self.supervisor) {
            warn!("Could not send queued auth request: {}", e);
        }
    }

    /// Transport reported an error on `conn`
    pub fn on_transport_error(&mut self, conn: ConnectionId, error: &str) {
        if !self.supervisor.on_error(conn) {
            return;
        }
        warn!("Transport error on {}: {}", conn, error);
        self.view
            .on_system_notice(&format!("Connection error: {}", error));
    }

    /// Transport closed `conn`
    pub fn on_transport_close(&mut self, conn: ConnectionId, now: Instant) {
        if !self.supervisor.on_close(conn, now) {
            return;
        }
        if self.identity.is_some() {
            self.set_state(SessionState::Reconnecting);
        }
    }

    /// One inbound wire message on `conn`
    pub fn on_frame(&mut self, conn: ConnectionId, raw: &str, now: Instant) {
        if !self.supervisor.is_current(conn) {
            debug!("Dropping frame from stale {}", conn);
            return;
        }

        match self.router.on_frame(raw) {
            Routed::Notice(text) => self.view.on_system_notice(&text),
            Routed::RemoteTyping { user } => {
                if self.typing.on_remote_typing(&user, now) {
                    self.view.on_typing_start(&user);
                }
            }
            Routed::Chat { user, text } => {
                if self.typing.on_remote_message(&user) {
                    self.view.on_typing_stop(&user);
                }
                self.view.on_chat_message(&user, &text, Utc::now());
            }
            Routed::AuthResponse { kind, response } => {
                let wire_id = response.request_id.as_deref();
                let Some(kind) = kind.or_else(|| self.auth.legacy_kind(wire_id)) else {
                    debug!("Auth response with nothing pending dropped");
                    return;
                };
                if let Some(resolution) = self.auth.resolve(kind, &response, &mut self.store) {
                    self.apply_auth(resolution);
                }
            }
            Routed::Echo {
                kind,
                nickname,
                request_id,
            } => {
                self.auth
                    .observe_echo(kind, &nickname, request_id.as_deref(), now);
            }
            Routed::Ignored => {}
        }
    }

    /// Fire every timer due at `now`
    pub fn on_tick(&mut self, now: Instant) {
        for resolution in self.auth.poll(now, &mut self.store) {
            self.apply_auth(resolution);
        }
        for user in self.typing.poll(now) {
            self.view.on_typing_stop(&user);
        }
        if self.supervisor.take_due_reconnect(now) {
            self.reconnect();
        }
    }

    fn reconnect(&mut self) {
        if self.auth.has_pending() {
            // replay on the new connection once it opens
            self.auth.requeue();
            if self.identity.is_none() {
                info!("Reopening connection for pending auth request");
                self.supervisor.open_anonymous();
                return;
            }
        }
        self.resume();
    }

    /// Dial as the current identity, falling back to the stored credential
    ///
    /// Logs out if neither can be used.
    fn resume(&mut self) {
        let Some(credential) = self.identity.clone().or_else(|| self.store.load()) else {
            if self.state != SessionState::LoggedOut {
                self.logout();
            }
            return;
        };
        match self.supervisor.connect_as(&credential, &self.store) {
            Ok(_) => {
                self.set_identity(Some(credential));
                self.set_state(SessionState::Reconnecting);
            }
            Err(SessionError::TokenExpired) => {
                self.view
                    .on_system_notice("Session expired, please log in again");
                self.logout();
            }
            Err(e) => warn!("Cannot resume session: {}", e),
        }
    }

    fn apply_auth(&mut self, resolution: AuthResolution) {
        match resolution.outcome {
            AuthOutcome::Verified(credential) => self.authenticated(credential),
            AuthOutcome::Degraded(credential) => {
                self.view.on_system_notice(
                    "Server did not confirm the login; continuing with an unverified local session",
                );
                self.authenticated(credential);
            }
            outcome @ (AuthOutcome::Rejected(_) | AuthOutcome::TimedOut) => {
                let error = outcome.error_text();
                self.view.on_auth_result(false, error.as_deref());
                if self.identity.is_none() && !self.auth.has_pending() {
                    self.set_state(SessionState::LoggedOut);
                }
            }
        }
    }

    fn authenticated(&mut self, credential: Credential) {
        info!(
            "Authenticated as {} ({:?})",
            credential.display_name,
            credential.trust()
        );
        self.set_identity(Some(credential));
        self.view.on_auth_result(true, None);

        if self.supervisor.is_open() {
            self.send_join();
            self.set_state(SessionState::Connected);
        } else if self.supervisor.is_live() {
            self.set_state(SessionState::Reconnecting);
        } else {
            self.resume();
        }
    }

    fn send_join(&mut self) {
        let Some(identity) = &self.identity else {
            return;
        };
        let frame = ClientFrame::Join {
            user: identity.display_name.clone(),
            token: identity.token.clone(),
        };
        if let Err(e) = self.supervisor.send(&frame) {
            warn!("Could not send join: {}", e);
        }
    }

    /// Identity fields for an outbound frame; expired tokens force logout
    fn authenticated_identity(&mut self) -> Result<(String, String), SessionError> {
        let Some(identity) = &self.identity else {
            return Err(SessionError::NoCredential);
        };
        if self.store.is_expired(identity) {
            self.view
                .on_system_notice("Session expired, please log in again");
            self.logout();
            return Err(SessionError::TokenExpired);
        }
        Ok((identity.display_name.clone(), identity.token.clone()))
    }

    fn set_identity(&mut self, identity: Option<Credential>) {
        self.router
            .set_local_user(identity.as_ref().map(|c| c.display_name.clone()));
        self.identity = identity;
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        info!("Session state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.view.on_connection_state_change(state);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::credential::MemoryCredentialStore;
    use crate::view::ViewEvent;

    #[derive(Debug, Default)]
    struct RecordingView {
        events: Vec<ViewEvent>,
    }

    impl View for RecordingView {
        fn on_system_notice(&mut self, text: &str) {
            self.events.push(ViewEvent::SystemNotice(text.to_string()));
        }

        fn on_chat_message(&mut self, user: &str, text: &str, received_at: DateTime<Utc>) {
            self.events.push(ViewEvent::ChatMessage {
                user: user.to_string(),
                text: text.to_string(),
                received_at,
            });
        }

        fn on_typing_start(&mut self, user: &str) {
            self.events.push(ViewEvent::TypingStart(user.to_string()));
        }

        fn on_typing_stop(&mut self, user: &str) {
            self.events.push(ViewEvent::TypingStop(user.to_string()));
        }

        fn on_auth_result(&mut self, success: bool, error: Option<&str>) {
            self.events.push(ViewEvent::AuthResult {
                success,
                error: error.map(str::to_string),
            });
        }

        fn on_connection_state_change(&mut self, state: SessionState) {
            self.events.push(ViewEvent::StateChange(state));
        }
    }

    type Controller = SessionController<MemoryCredentialStore, RecordingView>;

    fn controller(store: MemoryCredentialStore) -> Controller {
        SessionController::new(&SessionConfig::default(), store, RecordingView::default())
    }

    fn logged_in_store() -> MemoryCredentialStore {
        MemoryCredentialStore::with_credential(Credential::new("abc.def.ghi", "bob", "Bob"))
    }

    fn dialed(commands: &[TransportCommand]) -> Vec<ConnectionId> {
        commands
            .iter()
            .filter_map(|c| match c {
                TransportCommand::Dial { conn, .. } => Some(*conn),
                _ => None,
            })
            .collect()
    }

    fn sent(commands: &[TransportCommand]) -> Vec<String> {
        commands
            .iter()
            .filter_map(|c| match c {
                TransportCommand::Send { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Resume from the cached credential and open the connection
    fn connected(store: MemoryCredentialStore) -> (Controller, ConnectionId) {
        let mut session = controller(store);
        session.start();
        let conn = dialed(&session.drain_commands())[0];
        session.on_transport_open(conn);
        session.drain_commands();
        (session, conn)
    }

    #[test]
    fn test_empty_store_stays_logged_out() {
        let mut session = controller(MemoryCredentialStore::new());
        session.start();
        assert!(session.drain_commands().is_empty());
        assert_eq!(session.state(), SessionState::LoggedOut);
        assert_eq!(session.connection_state(), ConnectionState::Idle);
    }

    #[test]
    fn test_resume_sends_join_on_open() {
        let mut session = controller(logged_in_store());
        session.start();
        assert_eq!(session.state(), SessionState::Reconnecting);
        let conn = dialed(&session.drain_commands())[0];

        session.on_transport_open(conn);
        assert_eq!(session.state(), SessionState::Connected);
        let frames = sent(&session.drain_commands());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("\"type\":\"join\""));
        assert!(frames[0].contains("\"user\":\"Bob\""));
        assert!(frames[0].contains("\"token\":\"abc.def.ghi\""));
    }

    #[test]
    fn test_expired_cached_token_logs_out() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"exp":1000}"#);
        let token = format!("h.{}.s", payload);
        let store = MemoryCredentialStore::with_credential(Credential::new(token, "bob", "Bob"));
        let mut session = controller(store);
        session.start();

        assert!(dialed(&session.drain_commands()).is_empty());
        assert_eq!(session.state(), SessionState::LoggedOut);
        assert!(session.store().load().is_none());
    }

    #[test]
    fn test_login_scenario() {
        let mut session = controller(MemoryCredentialStore::new());
        let now = Instant::now();
        session
            .submit_auth(AuthRequest::login("bob", "pw1"), None, now)
            .unwrap();
        assert_eq!(session.state(), SessionState::Authenticating);

        let conn = dialed(&session.drain_commands())[0];
        session.on_transport_open(conn);
        let frames = sent(&session.drain_commands());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("\"type\":\"login\""));

        session.on_frame(
            conn,
            r#"{"type":"login_response","success":true,"token":"abc.def.ghi","display_name":"Bob"}"#,
            now + Duration::from_secs(1),
        );

        let stored = session.store().load().unwrap();
        assert_eq!(stored.token, "abc.def.ghi");
        assert_eq!(stored.display_name, "Bob");
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.trust(), Some(TrustLevel::ServerVerified));
        assert!(session.view().events.contains(&ViewEvent::AuthResult {
            success: true,
            error: None
        }));
        // join follows the successful login on the same connection
        let frames = sent(&session.drain_commands());
        assert!(frames[0].contains("\"type\":\"join\""));
    }

    #[test]
    fn test_register_mismatch_never_reaches_wire() {
        let mut session = controller(MemoryCredentialStore::new());
        let result = session.submit_auth(
            AuthRequest::register("bob", "Bob", "pw", "pw2"),
            None,
            Instant::now(),
        );
        assert!(matches!(
            result,
            Err(SessionError::Validation(ValidationError::PasswordMismatch))
        ));
        assert!(session.drain_commands().is_empty());
        assert_eq!(session.state(), SessionState::LoggedOut);
    }

    #[test]
    fn test_rejected_login_keeps_store_and_connection() {
        let mut session = controller(MemoryCredentialStore::new());
        let now = Instant::now();
        session
            .submit_auth(AuthRequest::login("bob", "bad"), None, now)
            .unwrap();
        let conn = dialed(&session.drain_commands())[0];
        session.on_transport_open(conn);

        session.on_frame(
            conn,
            r#"{"type":"login_response","success":false,"error":"Wrong password"}"#,
            now,
        );
        assert!(session.store().load().is_none());
        assert_eq!(session.state(), SessionState::LoggedOut);
        assert_eq!(session.connection_state(), ConnectionState::Open);
        assert!(session.view().events.contains(&ViewEvent::AuthResult {
            success: false,
            error: Some("Wrong password".to_string())
        }));
    }

    #[test]
    fn test_timeout_then_late_response_is_noop() {
        let mut session = controller(MemoryCredentialStore::new());
        let now = Instant::now();
        session
            .submit_auth(AuthRequest::login("bob", "pw"), None, now)
            .unwrap();
        let conn = dialed(&session.drain_commands())[0];
        session.on_transport_open(conn);

        session.on_tick(now + Duration::from_secs(5));
        assert_eq!(session.state(), SessionState::LoggedOut);

        session.on_frame(
            conn,
            r#"{"type":"login_response","success":true,"token":"abc.def.ghi"}"#,
            now + Duration::from_secs(6),
        );
        assert!(session.store().load().is_none());
        assert_eq!(session.state(), SessionState::LoggedOut);
        let successes = session
            .view()
            .events
            .iter()
            .filter(|e| matches!(e, ViewEvent::AuthResult { success: true, .. }))
            .count();
        assert_eq!(successes, 0);
    }

    #[test]
    fn test_echo_fallback_is_labelled_degraded() {
        let mut session = controller(MemoryCredentialStore::new());
        let now = Instant::now();
        let request_id = session
            .submit_auth(AuthRequest::login("bob", "pw"), None, now)
            .unwrap();
        let conn = dialed(&session.drain_commands())[0];
        session.on_transport_open(conn);
        let echoed = sent(&session.drain_commands()).remove(0);
        assert!(echoed.contains(&request_id.to_string()));

        session.on_frame(conn, &echoed, now);
        session.on_tick(now + Duration::from_secs(1));

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.trust(), Some(TrustLevel::LocalPlaceholder));
        assert_eq!(
            session.store().load().map(|c| c.trust()),
            Some(TrustLevel::LocalPlaceholder)
        );
    }

    #[test]
    fn test_close_schedules_one_reconnect() {
        let (mut session, conn) = connected(logged_in_store());
        let now = Instant::now();

        session.on_transport_close(conn, now);
        assert_eq!(session.state(), SessionState::Reconnecting);
        assert_eq!(session.next_deadline(), Some(now + Duration::from_secs(5)));

        session.on_transport_close(conn, now + Duration::from_secs(2));
        assert_eq!(session.next_deadline(), Some(now + Duration::from_secs(5)));

        session.on_tick(now + Duration::from_secs(5));
        let commands = session.drain_commands();
        assert_eq!(dialed(&commands).len(), 1);
        assert!(session.next_deadline().is_none());
    }

    #[test]
    fn test_stale_socket_cannot_trigger_reconnect() {
        let (mut session, old) = connected(logged_in_store());
        let now = Instant::now();
        session.on_transport_close(old, now);
        session.on_tick(now + Duration::from_secs(5));
        let new = dialed(&session.drain_commands())[0];
        session.on_transport_open(new);

        session.on_transport_close(old, now + Duration::from_secs(6));
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.next_deadline().is_none());

        session.on_frame(old, r#"{"type":"system","text":"ghost"}"#, now);
        assert!(!session
            .view()
            .events
            .contains(&ViewEvent::SystemNotice("ghost".to_string())));
    }

    #[test]
    fn test_error_surfaces_without_reconnect() {
        let (mut session, conn) = connected(logged_in_store());
        session.on_transport_error(conn, "reset by peer");
        assert!(session.next_deadline().is_none());
        assert!(session.view().events.contains(&ViewEvent::SystemNotice(
            "Connection error: reset by peer".to_string()
        )));
    }

    #[test]
    fn test_logout_discards_connection_without_reconnect() {
        let (mut session, conn) = connected(logged_in_store());
        session.logout();
        assert_eq!(session.state(), SessionState::LoggedOut);
        assert!(session.store().load().is_none());
        assert_eq!(session.drain_commands(), vec![TransportCommand::Close { conn }]);

        session.on_transport_close(conn, Instant::now());
        assert!(session.next_deadline().is_none());
    }

    #[test]
    fn test_message_clears_remote_typing() {
        let (mut session, conn) = connected(logged_in_store());
        let now = Instant::now();
        session.on_frame(conn, r#"{"type":"typing","user":"Ann"}"#, now);
        assert!(session.is_remote_typing("Ann"));

        session.on_frame(conn, r#"{"type":"message","user":"Ann","text":"hi"}"#, now);
        assert!(!session.is_remote_typing("Ann"));
        let events = &session.view().events;
        let stop = events
            .iter()
            .position(|e| *e == ViewEvent::TypingStop("Ann".to_string()));
        let chat = events
            .iter()
            .position(|e| matches!(e, ViewEvent::ChatMessage { user, .. } if user == "Ann"));
        assert!(stop.is_some() && stop < chat);
    }

    #[test]
    fn test_own_typing_frame_ignored() {
        let (mut session, conn) = connected(logged_in_store());
        session.on_frame(conn, r#"{"type":"typing","user":"Bob"}"#, Instant::now());
        assert!(!session.is_remote_typing("Bob"));
    }

    #[test]
    fn test_typing_burst_sends_one_frame() {
        let (mut session, _conn) = connected(logged_in_store());
        let now = Instant::now();
        for ms in 0..10 {
            session.input_changed("h", now + Duration::from_millis(ms * 150));
        }
        let frames = sent(&session.drain_commands());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("\"type\":\"typing\""));
    }

    #[test]
    fn test_send_message_and_clear_history() {
        let (mut session, _conn) = connected(logged_in_store());
        assert!(matches!(
            session.send_message("   "),
            Err(SessionError::Validation(_))
        ));
        session.send_message("hello").unwrap();
        session.clear_history().unwrap();
        let frames = sent(&session.drain_commands());
        assert!(frames[0].contains("\"type\":\"message\""));
        assert!(frames[0].contains("\"text\":\"hello\""));
        assert!(frames[1].contains("\"type\":\"clear_history\""));
    }

    #[test]
    fn test_send_without_session_fails() {
        let mut session = controller(MemoryCredentialStore::new());
        assert!(matches!(
            session.send_message("hi"),
            Err(SessionError::NoCredential)
        ));
        let mut session = controller(logged_in_store());
        session.start();
        assert!(matches!(
            session.send_message("hi"),
            Err(SessionError::NotConnected)
        ));
    }

    #[test]
    fn test_malformed_frame_keeps_connection() {
        let (mut session, conn) = connected(logged_in_store());
        session.on_frame(conn, "{definitely not json", Instant::now());
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.connection_state(), ConnectionState::Open);
    }

    #[test]
    fn test_pending_auth_replayed_after_reconnect() {
        let config = SessionConfig::default().with_auth_timeout(Duration::from_secs(30));
        let mut session =
            SessionController::new(&config, MemoryCredentialStore::new(), RecordingView::default());
        let now = Instant::now();
        session
            .submit_auth(AuthRequest::login("bob", "pw"), None, now)
            .unwrap();
        let first = dialed(&session.drain_commands())[0];
        session.on_transport_open(first);
        session.drain_commands();

        session.on_transport_close(first, now);
        session.on_tick(now + Duration::from_secs(5));
        assert_eq!(session.state(), SessionState::Authenticating);
        let second = dialed(&session.drain_commands())[0];

        session.on_transport_open(second);
        let frames = sent(&session.drain_commands());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("\"type\":\"login\""));

        session.on_frame(
            second,
            r#"{"type":"login_response","success":true,"token":"abc.def.ghi","display_name":"Bob"}"#,
            now + Duration::from_secs(6),
        );
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_pending_login_replayed_when_already_logged_in() {
        let config = SessionConfig::default().with_auth_timeout(Duration::from_secs(30));
        let mut session = SessionController::new(&config, logged_in_store(), RecordingView::default());
        session.start();
        let first = dialed(&session.drain_commands())[0];
        session.on_transport_open(first);
        session.drain_commands();

        let now = Instant::now();
        session
            .submit_auth(AuthRequest::login("amy", "pw"), None, now)
            .unwrap();
        assert!(sent(&session.drain_commands())[0].contains("\"type\":\"login\""));

        session.on_transport_close(first, now);
        session.on_tick(now + Duration::from_secs(5));
        let second = dialed(&session.drain_commands())[0];
        session.on_transport_open(second);

        let frames = sent(&session.drain_commands());
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"type\":\"join\""));
        assert!(frames[1].contains("\"type\":\"login\""));
        assert!(frames[1].contains("\"nickname\":\"amy\""));
    }

    /// Store that can be read but never written
    #[derive(Debug, Default)]
    struct ReadOnlyStore {
        cached: Option<Credential>,
    }

    impl CredentialStore for ReadOnlyStore {
        fn load(&self) -> Option<Credential> {
            self.cached.clone()
        }

        fn save(&mut self, _credential: &Credential) -> Result<(), SessionError> {
            Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }

        fn clear(&mut self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    #[test]
    fn test_unsaved_credential_still_drives_reconnect() {
        let store = ReadOnlyStore {
            cached: Some(Credential::new("abc.def.ghi", "bob", "Bob")),
        };
        let mut session = SessionController::new(&SessionConfig::default(), store, RecordingView::default());
        let now = Instant::now();
        session
            .submit_auth(AuthRequest::login("amy", "pw"), None, now)
            .unwrap();
        let conn = dialed(&session.drain_commands())[0];
        session.on_transport_open(conn);
        let echoed = sent(&session.drain_commands()).remove(0);
        session.on_frame(conn, &echoed, now);
        session.on_transport_close(conn, now);

        session.on_tick(now + Duration::from_secs(1));
        assert_eq!(session.state(), SessionState::Reconnecting);
        assert_eq!(session.identity().map(|c| c.login_handle.as_str()), Some("amy"));
        let next = dialed(&session.drain_commands())[0];

        session.on_transport_open(next);
        let frames = sent(&session.drain_commands());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("\"user\":\"amy\""));
        assert_eq!(session.state(), SessionState::Connected);
    }
}
