//! Chat Session Engine Library
//!
//! The client side of a WebSocket chat: credential persistence, connection
//! supervision with reconnect, login and registration, inbound frame routing
//! and typing-indicator coalescing.
//!
//! # Features
//! - Cached-token session resume with expiry checks
//! - Login and registration with request correlation and timeouts
//! - Degraded echo-server fallback, labelled as unverified
//! - Fixed-delay reconnect with stale-socket cancellation
//! - Typing indicators, local and remote
//!
//! # Architecture
//! - `SessionController` is a synchronous state machine; every input carries
//!   an explicit `Instant` and transport work comes out as `TransportCommand`s
//! - `SessionRuntime` is the actor that owns the controller, runs the
//!   WebSocket tasks and fires timers
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use chat_session::{ChannelView, FileCredentialStore, SessionConfig, SessionRuntime};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SessionConfig::from_env();
//!     let store = FileCredentialStore::new(&config.credentials_path);
//!     let (view, mut events) = ChannelView::new();
//!     let (runtime, handle) = SessionRuntime::new(&config, store, view);
//!     tokio::spawn(runtime.run());
//!
//!     handle.login("bob", "secret").await.unwrap();
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod credential;
pub mod error;
pub mod message;
pub mod router;
pub mod runtime;
pub mod session;
pub mod transport;
pub mod types;
pub mod typing;
pub mod view;

// Re-export main types for convenience
pub use auth::{AuthCallback, AuthFlow, AuthOutcome, AuthRequest};
pub use config::SessionConfig;
pub use connection::{ConnectionState, ConnectionSupervisor, TransportCommand};
pub use credential::{
    Credential, CredentialStore, DecodeFailurePolicy, FileCredentialStore, MemoryCredentialStore,
};
pub use error::{SessionError, TokenError, ValidationError};
pub use message::{AuthResponse, ClientFrame, InboundFrame};
pub use router::{MessageRouter, Routed};
pub use runtime::{SessionCommand, SessionHandle, SessionRuntime};
pub use session::{SessionController, SessionState};
pub use types::{AuthKind, ConnectionId, RequestId, TrustLevel};
pub use typing::TypingCoalescer;
pub use view::{ChannelView, View, ViewEvent};
