//! Session configuration
//!
//! Timing windows, server address and credential location. Defaults match
//! the reference chat server; `from_env` overlays environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::credential::DecodeFailurePolicy;

/// Default server address
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:9002";

/// Default credential file
pub const DEFAULT_CREDENTIALS_PATH: &str = "chat_credentials.json";

/// Engine configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the chat server
    pub server_url: String,
    /// Where `FileCredentialStore` keeps the cached credential
    pub credentials_path: PathBuf,
    /// Wait between a close and the next dial
    pub reconnect_delay: Duration,
    /// Bounded wait for a login/register response
    pub auth_timeout: Duration,
    /// Wait after an echoed auth request before minting a placeholder session
    pub echo_settle_delay: Duration,
    /// Local idle window; one typing frame per window at most
    pub typing_idle: Duration,
    /// Lifetime of a remote typing indicator without refresh
    pub remote_typing_expiry: Duration,
    /// What an undecodable token counts as
    pub decode_failure_policy: DecodeFailurePolicy,
    /// Accept echo-only servers via the placeholder-token fallback
    pub degraded_auth: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            reconnect_delay: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(5),
            echo_settle_delay: Duration::from_secs(1),
            typing_idle: Duration::from_secs(2),
            remote_typing_expiry: Duration::from_secs(5),
            decode_failure_policy: DecodeFailurePolicy::FailOpen,
            degraded_auth: true,
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with `CHAT_SERVER_URL`, `CHAT_CREDENTIALS`,
    /// `CHAT_TOKEN_POLICY` and `CHAT_DEGRADED_AUTH`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("CHAT_SERVER_URL") {
            config.server_url = url;
        }
        if let Ok(path) = env::var("CHAT_CREDENTIALS") {
            config.credentials_path = PathBuf::from(path);
        }
        if let Ok(policy) = env::var("CHAT_TOKEN_POLICY") {
            config.decode_failure_policy = DecodeFailurePolicy::parse(&policy);
        }
        if let Ok(flag) = env::var("CHAT_DEGRADED_AUTH") {
            config.degraded_auth = !matches!(flag.as_str(), "0" | "false" | "off");
        }
        config
    }

    /// Set the server URL
    #[must_use]
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Set the credential file location
    #[must_use]
    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = path.into();
        self
    }

    /// Set the reconnect delay
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the auth response timeout
    #[must_use]
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set the token decode failure policy
    #[must_use]
    pub fn with_decode_failure_policy(mut self, policy: DecodeFailurePolicy) -> Self {
        self.decode_failure_policy = policy;
        self
    }

    /// Enable or disable the echo fallback
    #[must_use]
    pub fn with_degraded_auth(mut self, enabled: bool) -> Self {
        self.degraded_auth = enabled;
        self
    }
}
