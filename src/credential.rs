//! Credential persistence and token expiry checks
//!
//! A credential is the durable proof of identity: token plus the login
//! handle and display name it was issued for. Two token shapes exist:
//!
//! - placeholder tokens (`local-…`), minted locally by the degraded-mode
//!   fallback, which never expire
//! - structured tokens (`header.payload.signature`), whose base64url payload
//!   carries an `exp` claim in seconds since the epoch
//!
//! A structured token that cannot be decoded is judged by
//! [`DecodeFailurePolicy`]. The default, `FailOpen`, treats it as valid.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{SessionError, TokenError};
use crate::types::TrustLevel;

/// Reserved prefix of locally minted placeholder tokens
pub const PLACEHOLDER_PREFIX: &str = "local-";

/// Random characters after the placeholder prefix
const PLACEHOLDER_SUFFIX_LEN: usize = 24;

/// Well-known persisted keys
pub const TOKEN_KEY: &str = "token";
pub const DISPLAY_NAME_KEY: &str = "display_name";
pub const HANDLE_KEY: &str = "nickname";

/// How a structurally malformed or undecodable token is judged
///
/// `FailOpen` keeps the session usable when the token format is unknown.
/// `FailClosed` treats such tokens as expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeFailurePolicy {
    #[default]
    FailOpen,
    FailClosed,
}

impl DecodeFailurePolicy {
    /// Parse a policy name; anything unrecognised is `FailOpen`
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "fail-closed" | "fail_closed" | "closed" | "strict" => DecodeFailurePolicy::FailClosed,
            _ => DecodeFailurePolicy::FailOpen,
        }
    }

    fn expired_on_failure(self) -> bool {
        matches!(self, DecodeFailurePolicy::FailClosed)
    }
}

/// Claims read from a structured token payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenClaims {
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub nickname: Option<String>,
    pub display_name: Option<String>,
}

/// Whether the token was minted by the degraded-mode fallback
pub fn is_placeholder(token: &str) -> bool {
    token.starts_with(PLACEHOLDER_PREFIX)
}

/// Mint a new placeholder token
pub fn mint_placeholder_token() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(PLACEHOLDER_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", PLACEHOLDER_PREFIX, suffix)
}

/// Decode the claims of a `header.payload.signature` token
///
/// The signature is not verified; only the server can do that.
pub fn decode_claims(token: &str) -> Result<TokenClaims, TokenError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::Malformed);
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Expiry check against an explicit clock
///
/// Never fails: decode problems are logged and resolved by `policy`.
pub fn is_token_expired_at(token: &str, now: DateTime<Utc>, policy: DecodeFailurePolicy) -> bool {
    if is_placeholder(token) {
        return false;
    }

    match decode_claims(token) {
        Ok(claims) => claims.exp.is_some_and(|exp| exp <= now.timestamp()),
        Err(e) => {
            let expired = policy.expired_on_failure();
            warn!("Undecodable token ({}), treating as expired={}", e, expired);
            expired
        }
    }
}

/// Persisted proof of identity
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub token: String,
    pub login_handle: String,
    pub display_name: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Build a credential, reading `iat`/`exp` from the token when it has them
    pub fn new(
        token: impl Into<String>,
        login_handle: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let token = token.into();
        let claims = decode_claims(&token).unwrap_or_default();
        Self {
            issued_at: claims.iat.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            expires_at: claims.exp.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            token,
            login_handle: login_handle.into(),
            display_name: display_name.into(),
        }
    }

    /// Credential backed by a freshly minted placeholder token
    pub fn placeholder(login_handle: impl Into<String>, display_name: impl Into<String>) -> Self {
        let mut credential = Self::new(mint_placeholder_token(), login_handle, display_name);
        credential.issued_at = Some(Utc::now());
        credential
    }

    /// Whether the server vouched for this token
    pub fn trust(&self) -> TrustLevel {
        if is_placeholder(&self.token) {
            TrustLevel::LocalPlaceholder
        } else {
            TrustLevel::ServerVerified
        }
    }

    /// Expiry check against an explicit clock
    pub fn is_expired_at(&self, now: DateTime<Utc>, policy: DecodeFailurePolicy) -> bool {
        is_token_expired_at(&self.token, now, policy)
    }
}

/// Durable credential storage
///
/// Exactly one credential record exists. `load` treats absence and any
/// decode problem alike: logged out.
pub trait CredentialStore {
    /// Read the cached credential
    fn load(&self) -> Option<Credential>;

    /// Replace the cached credential
    fn save(&mut self, credential: &Credential) -> Result<(), SessionError>;

    /// Forget the cached credential
    fn clear(&mut self) -> Result<(), SessionError>;

    /// Policy applied to undecodable tokens
    fn decode_failure_policy(&self) -> DecodeFailurePolicy {
        DecodeFailurePolicy::default()
    }

    /// Expiry check against the wall clock; never fails
    fn is_expired(&self, credential: &Credential) -> bool {
        credential.is_expired_at(Utc::now(), self.decode_failure_policy())
    }
}

/// In-process credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: Option<Credential>,
    policy: DecodeFailurePolicy,
}

impl MemoryCredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding a credential
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Some(credential),
            policy: DecodeFailurePolicy::default(),
        }
    }

    /// Set the decode failure policy
    #[must_use]
    pub fn with_policy(mut self, policy: DecodeFailurePolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Option<Credential> {
        self.credential.clone()
    }

    fn save(&mut self, credential: &Credential) -> Result<(), SessionError> {
        self.credential = Some(credential.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), SessionError> {
        self.credential = None;
        Ok(())
    }

    fn decode_failure_policy(&self) -> DecodeFailurePolicy {
        self.policy
    }
}

/// Credential store backed by a JSON file of well-known string keys
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    policy: DecodeFailurePolicy,
}

impl FileCredentialStore {
    /// Create a store at the given path (the file need not exist)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            policy: DecodeFailurePolicy::default(),
        }
    }

    /// Set the decode failure policy
    #[must_use]
    pub fn with_policy(mut self, policy: DecodeFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Option<HashMap<String, String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No credential file at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Cannot read credential file {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!("Invalid credential file {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Option<Credential> {
        let mut entries = self.read_entries()?;
        let token = entries.remove(TOKEN_KEY).filter(|t| !t.is_empty())?;
        let mut handle = entries.remove(HANDLE_KEY).filter(|h| !h.is_empty());
        let mut display_name = entries.remove(DISPLAY_NAME_KEY).filter(|n| !n.is_empty());

        // identity missing from the file falls back to the token's claims
        if handle.is_none() || display_name.is_none() {
            if let Ok(claims) = decode_claims(&token) {
                handle = handle.or(claims.nickname.filter(|h| !h.is_empty()));
                display_name = display_name.or(claims.display_name.filter(|n| !n.is_empty()));
            }
        }

        let (handle, display_name) = match (handle, display_name) {
            (Some(handle), Some(name)) => (handle, name),
            (Some(handle), None) => (handle.clone(), handle),
            (None, Some(name)) => (name.clone(), name),
            (None, None) => {
                warn!("Credential file has a token but no identity");
                return None;
            }
        };

        Some(Credential::new(token, handle, display_name))
    }

    fn save(&mut self, credential: &Credential) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let entries = HashMap::from([
            (TOKEN_KEY, credential.token.as_str()),
            (HANDLE_KEY, credential.login_handle.as_str()),
            (DISPLAY_NAME_KEY, credential.display_name.as_str()),
        ]);
        fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;
        debug!("Saved credential to {}", self.path.display());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn decode_failure_policy(&self) -> DecodeFailurePolicy {
        self.policy
    }
}
