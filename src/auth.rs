//! Login and registration exchange
//!
//! At most one request per [`AuthKind`] is in flight; a second submission
//! of the same kind is rejected. A request resolves exactly once, by the
//! first of:
//!
//! - a matching `*_response` frame (server-confirmed)
//! - the auth timeout
//! - the echo fallback: the server reflected our request instead of
//!   answering, so after a settle delay a placeholder session is minted
//!
//! Anything arriving after resolution is an orphan and is dropped.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::connection::ConnectionSupervisor;
use crate::credential::{Credential, CredentialStore};
use crate::error::{SessionError, ValidationError};
use crate::message::{AuthResponse, ClientFrame};
use crate::types::{AuthKind, RequestId, TrustLevel};

/// Progress callback handed in with a submission
pub type AuthCallback = Box<dyn FnOnce(&AuthOutcome) + Send>;

/// Credentials entered by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    Login {
        handle: String,
        password: String,
    },
    Register {
        handle: String,
        display_name: String,
        password: String,
        confirm: String,
    },
}

impl AuthRequest {
    /// Login request
    pub fn login(handle: impl Into<String>, password: impl Into<String>) -> Self {
        AuthRequest::Login {
            handle: handle.into(),
            password: password.into(),
        }
    }

    /// Registration request
    pub fn register(
        handle: impl Into<String>,
        display_name: impl Into<String>,
        password: impl Into<String>,
        confirm: impl Into<String>,
    ) -> Self {
        AuthRequest::Register {
            handle: handle.into(),
            display_name: display_name.into(),
            password: password.into(),
            confirm: confirm.into(),
        }
    }

    /// Which response this request waits for
    pub fn kind(&self) -> AuthKind {
        match self {
            AuthRequest::Login { .. } => AuthKind::Login,
            AuthRequest::Register { .. } => AuthKind::Register,
        }
    }

    /// Local checks; failures never reach the wire
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            AuthRequest::Login { handle, password } => {
                require("login", handle)?;
                require("password", password)?;
            }
            AuthRequest::Register {
                handle,
                display_name,
                password,
                confirm,
            } => {
                require("login", handle)?;
                require("display name", display_name)?;
                require("password", password)?;
                require("password confirmation", confirm)?;
                if !handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(ValidationError::InvalidHandle);
                }
                if password != confirm {
                    return Err(ValidationError::PasswordMismatch);
                }
            }
        }
        Ok(())
    }

    fn handle(&self) -> &str {
        match self {
            AuthRequest::Login { handle, .. } | AuthRequest::Register { handle, .. } => handle,
        }
    }

    fn display_name(&self) -> Option<&str> {
        match self {
            AuthRequest::Login { .. } => None,
            AuthRequest::Register { display_name, .. } => Some(display_name),
        }
    }

    fn to_frame(&self, request_id: RequestId) -> ClientFrame {
        match self {
            AuthRequest::Login { handle, password } => ClientFrame::Login {
                nickname: handle.clone(),
                password: password.clone(),
                request_id: request_id.to_string(),
            },
            AuthRequest::Register {
                handle,
                display_name,
                password,
                ..
            } => ClientFrame::Register {
                nickname: handle.clone(),
                display_name: display_name.clone(),
                password: password.clone(),
                request_id: request_id.to_string(),
            },
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::EmptyField(field))
    } else {
        Ok(())
    }
}

/// How a request ended
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    /// Server issued a token
    Verified(Credential),
    /// Echo-only server; placeholder token minted locally
    Degraded(Credential),
    /// Server said no
    Rejected(String),
    /// No answer within the wait window
    TimedOut,
}

impl AuthOutcome {
    /// The new credential, if the session is now authenticated
    pub fn credential(&self) -> Option<&Credential> {
        match self {
            AuthOutcome::Verified(credential) | AuthOutcome::Degraded(credential) => Some(credential),
            AuthOutcome::Rejected(_) | AuthOutcome::TimedOut => None,
        }
    }

    /// Whether the request succeeded
    pub fn is_success(&self) -> bool {
        self.credential().is_some()
    }

    /// Trust of the resulting session
    pub fn trust(&self) -> Option<TrustLevel> {
        self.credential().map(Credential::trust)
    }

    /// Text to show on failure
    pub fn error_text(&self) -> Option<String> {
        match self {
            AuthOutcome::Verified(_) | AuthOutcome::Degraded(_) => None,
            AuthOutcome::Rejected(reason) => Some(reason.clone()),
            AuthOutcome::TimedOut => Some("Server did not respond in time".to_string()),
        }
    }
}

/// A resolved request, ready for the session to act on
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResolution {
    pub kind: AuthKind,
    pub request_id: RequestId,
    pub outcome: AuthOutcome,
}

/// One in-flight request
struct PendingAuthRequest {
    request: AuthRequest,
    request_id: RequestId,
    submitted_at: Instant,
    deadline: Instant,
    sent: bool,
    echo_settle_at: Option<Instant>,
    callback: Option<AuthCallback>,
}

impl std::fmt::Debug for PendingAuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthRequest")
            .field("kind", &self.request.kind())
            .field("request_id", &self.request_id)
            .field("submitted_at", &self.submitted_at)
            .field("sent", &self.sent)
            .field("echo_settle_at", &self.echo_settle_at)
            .finish()
    }
}

/// Drives the login/registration exchange
#[derive(Debug)]
pub struct AuthFlow {
    timeout: Duration,
    echo_settle_delay: Duration,
    degraded_auth: bool,
    pending: HashMap<AuthKind, PendingAuthRequest>,
}

impl AuthFlow {
    /// Create an idle flow
    pub fn new(timeout: Duration, echo_settle_delay: Duration, degraded_auth: bool) -> Self {
        Self {
            timeout,
            echo_settle_delay,
            degraded_auth,
            pending: HashMap::new(),
        }
    }

    /// Whether a request of `kind` is in flight
    pub fn is_pending(&self, kind: AuthKind) -> bool {
        self.pending.contains_key(&kind)
    }

    /// Whether any request is in flight
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Validate, ensure a connection, and send (or queue) the request
    ///
    /// If no connection is live an anonymous one is dialed and the frame goes
    /// out from [`AuthFlow::flush`] once it opens.
    pub fn submit(
        &mut self,
        request: AuthRequest,
        callback: Option<AuthCallback>,
        now: Instant,
        supervisor: &mut ConnectionSupervisor,
    ) -> Result<RequestId, SessionError> {
        request.validate()?;

        let kind = request.kind();
        if self.is_pending(kind) {
            return Err(SessionError::AuthPending(kind));
        }

        if !supervisor.is_live() {
            supervisor.open_anonymous();
        }

        let request_id = RequestId::new();
        let mut pending = PendingAuthRequest {
            request,
            request_id,
            submitted_at: now,
            deadline: now + self.timeout,
            sent: false,
            echo_settle_at: None,
            callback,
        };
        if supervisor.is_open() {
            Self::send_pending(&mut pending, supervisor)?;
        }

        info!("Submitted {} request {}", kind, request_id);
        self.pending.insert(kind, pending);
        Ok(request_id)
    }

    /// Send requests queued while the connection was opening
    pub fn flush(&mut self, supervisor: &mut ConnectionSupervisor) -> Result<(), SessionError> {
        for pending in self.pending.values_mut().filter(|p| !p.sent) {
            Self::send_pending(pending, supervisor)?;
        }
        Ok(())
    }

    /// Mark every pending request unsent, for replay on a fresh connection
    pub fn requeue(&mut self) {
        for pending in self.pending.values_mut() {
            pending.sent = false;
        }
    }

    fn send_pending(
        pending: &mut PendingAuthRequest,
        supervisor: &mut ConnectionSupervisor,
    ) -> Result<(), SessionError> {
        supervisor.send(&pending.request.to_frame(pending.request_id))?;
        pending.sent = true;
        Ok(())
    }

    /// Resolve the pending request of `kind` with a server response
    ///
    /// Persists the credential on success; a rejection never touches the
    /// store. Returns `None` for orphaned or mismatched responses.
    pub fn resolve(
        &mut self,
        kind: AuthKind,
        response: &AuthResponse,
        store: &mut dyn CredentialStore,
    ) -> Option<AuthResolution> {
        let Some(pending) = self.pending.get(&kind) else {
            debug!("Orphaned {} response dropped", kind);
            return None;
        };
        if let Some(wire_id) = response.request_id.as_deref() {
            if !pending.request_id.matches(wire_id) {
                debug!("{} response for another request ({}) dropped", kind, wire_id);
                return None;
            }
        }

        let pending = self.pending.remove(&kind)?;
        let outcome = match (response.success, response.token.as_deref()) {
            (true, Some(token)) if !token.is_empty() => {
                let handle = response
                    .nickname
                    .clone()
                    .unwrap_or_else(|| pending.request.handle().to_string());
                let display_name = response
                    .display_name
                    .clone()
                    .or_else(|| pending.request.display_name().map(str::to_string))
                    .unwrap_or_else(|| handle.clone());
                AuthOutcome::Verified(Credential::new(token, handle, display_name))
            }
            (true, _) => AuthOutcome::Rejected("Server accepted but issued no token".to_string()),
            (false, _) => AuthOutcome::Rejected(response.failure_reason()),
        };

        Some(Self::finish(kind, pending, outcome, store))
    }

    /// Pick the kind a legacy `auth_response` answers
    ///
    /// The pending request whose id matches `request_id` wins; otherwise
    /// login before register.
    pub fn legacy_kind(&self, request_id: Option<&str>) -> Option<AuthKind> {
        let correlated = request_id.and_then(|id| {
            self.pending
                .iter()
                .find(|(_, pending)| pending.request_id.matches(id))
                .map(|(kind, _)| *kind)
        });
        correlated.or_else(|| {
            [AuthKind::Login, AuthKind::Register]
                .into_iter()
                .find(|kind| self.is_pending(*kind))
        })
    }

    /// Note that the server reflected a request back verbatim
    ///
    /// Arms the settle timer when it is our own request (same handle and
    /// correlation id). Returns whether it was.
    pub fn observe_echo(
        &mut self,
        kind: AuthKind,
        nickname: &str,
        request_id: Option<&str>,
        now: Instant,
    ) -> bool {
        if !self.degraded_auth {
            return false;
        }
        let Some(pending) = self.pending.get_mut(&kind) else {
            return false;
        };
        let ours = pending.request.handle() == nickname
            && request_id.map_or(true, |id| pending.request_id.matches(id));
        if !ours || pending.echo_settle_at.is_some() {
            return ours;
        }

        warn!("Server echoed {} request {}; awaiting settle before fallback", kind, pending.request_id);
        pending.echo_settle_at = Some(now + self.echo_settle_delay);
        true
    }

    /// Fire due settle and timeout timers
    pub fn poll(&mut self, now: Instant, store: &mut dyn CredentialStore) -> Vec<AuthResolution> {
        let mut due = Vec::new();
        for (kind, pending) in &self.pending {
            if pending.echo_settle_at.is_some_and(|at| at <= now) {
                due.push((*kind, true));
            } else if pending.deadline <= now {
                due.push((*kind, false));
            }
        }

        let mut resolutions = Vec::new();
        for (kind, degraded) in due {
            let Some(pending) = self.pending.remove(&kind) else {
                continue;
            };
            let outcome = if degraded {
                let handle = pending.request.handle().to_string();
                let display_name = pending
                    .request
                    .display_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| handle.clone());
                warn!("Degraded-mode {} for {}: server-unverified placeholder session", kind, handle);
                AuthOutcome::Degraded(Credential::placeholder(handle, display_name))
            } else {
                warn!("{} request {} timed out", kind, pending.request_id);
                AuthOutcome::TimedOut
            };
            resolutions.push(Self::finish(kind, pending, outcome, store));
        }
        resolutions
    }

    fn finish(
        kind: AuthKind,
        pending: PendingAuthRequest,
        outcome: AuthOutcome,
        store: &mut dyn CredentialStore,
    ) -> AuthResolution {
        if let Some(credential) = outcome.credential() {
            if let Err(e) = store.save(credential) {
                // the session still proceeds; only persistence across restarts is lost
                warn!("Failed to persist credential: {}", e);
            }
        }

        info!(
            "{} request {} resolved: success={}",
            kind,
            pending.request_id,
            outcome.is_success()
        );
        if let Some(callback) = pending.callback {
            callback(&outcome);
        }

        AuthResolution {
            kind,
            request_id: pending.request_id,
            outcome,
        }
    }

    /// Earliest timer among pending requests
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|p| p.echo_settle_at.map_or(p.deadline, |at| at.min(p.deadline)))
            .min()
    }

    /// Drop all pending requests without resolving them
    pub fn reset(&mut self) {
        if !self.pending.is_empty() {
            debug!("Discarding {} pending auth request(s)", self.pending.len());
        }
        self.pending.clear();
    }
}
