//! Session runtime actor
//!
//! The single task that owns the [`SessionController`]. All inputs (user
//! commands, transport events, timer expiry) are queued onto this task and
//! handled one at a time, so the engine needs no locks. After every input the
//! controller's transport commands are executed.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::AuthRequest;
use crate::config::SessionConfig;
use crate::connection::TransportCommand;
use crate::credential::CredentialStore;
use crate::error::SessionError;
use crate::session::SessionController;
use crate::transport::{run_connection, TransportEvent, TransportEventKind};
use crate::types::ConnectionId;
use crate::view::View;

/// Channel buffer size for user commands
const COMMAND_BUFFER_SIZE: usize = 64;

/// Channel buffer size for transport events
const EVENT_BUFFER_SIZE: usize = 256;

/// Commands sent from the front end to the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Submit a login or registration
    Authenticate(AuthRequest),
    /// Log out
    Logout,
    /// Send a chat line
    SendMessage(String),
    /// Local input changed
    InputChanged(String),
    /// Clear the shared history
    ClearHistory,
    /// Stop the runtime
    Shutdown,
}

/// Cloneable front door to a running [`SessionRuntime`]
#[derive(Debug, Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Queue a command
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| SessionError::ChannelSend)
    }

    /// Log in
    pub async fn login(
        &self,
        handle: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::Authenticate(AuthRequest::login(handle, password)))
            .await
    }

    /// Register
    pub async fn register(
        &self,
        handle: impl Into<String>,
        display_name: impl Into<String>,
        password: impl Into<String>,
        confirm: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::Authenticate(AuthRequest::register(
            handle,
            display_name,
            password,
            confirm,
        )))
        .await
    }

    /// Send a chat line
    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::SendMessage(text.into())).await
    }

    /// Report an input change
    pub async fn input_changed(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::InputChanged(text.into())).await
    }

    /// Log out
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Logout).await
    }

    /// Stop the runtime
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown).await
    }
}

/// One socket the runtime is driving
struct Link {
    /// Set once the transport reports the socket open
    outbound: Option<mpsc::Sender<String>>,
    task: JoinHandle<()>,
}

/// The session actor
pub struct SessionRuntime<S, V> {
    controller: SessionController<S, V>,
    commands: mpsc::Receiver<SessionCommand>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: mpsc::Receiver<TransportEvent>,
    links: HashMap<ConnectionId, Link>,
}

impl<S, V> SessionRuntime<S, V>
where
    S: CredentialStore + Send + 'static,
    V: View + Send + 'static,
{
    /// Create a runtime and the handle that drives it
    pub fn new(config: &SessionConfig, store: S, view: V) -> (Self, SessionHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let runtime = Self {
            controller: SessionController::new(config, store, view),
            commands: cmd_rx,
            events_tx,
            events_rx,
            links: HashMap::new(),
        };
        (runtime, SessionHandle { sender: cmd_tx })
    }

    /// Run the event loop until shutdown or every handle is dropped
    pub async fn run(mut self) {
        info!("Session runtime started");

        self.controller.start();
        self.execute();

        loop {
            let deadline = self.controller.next_deadline();
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(event) = self.events_rx.recv() => {
                    self.handle_transport_event(event);
                }
                _ = wait_until(deadline) => {
                    self.controller.on_tick(Instant::now());
                }
            }
            self.execute();
        }

        for (conn, link) in self.links.drain() {
            debug!("Dropping {} on shutdown", conn);
            link.task.abort();
        }
        info!("Session runtime shutting down");
    }

    /// Process a single user command
    fn handle_command(&mut self, cmd: SessionCommand) {
        let now = Instant::now();
        match cmd {
            SessionCommand::Authenticate(request) => {
                if let Err(e) = self.controller.submit_auth(request, None, now) {
                    warn!("Auth submission refused: {}", e);
                    self.controller
                        .view_mut()
                        .on_auth_result(false, Some(&e.to_string()));
                }
            }
            SessionCommand::Logout => self.controller.logout(),
            SessionCommand::SendMessage(text) => {
                if let Err(e) = self.controller.send_message(&text) {
                    warn!("Message not sent: {}", e);
                    self.controller
                        .view_mut()
                        .on_system_notice(&format!("Message not sent: {}", e));
                }
            }
            SessionCommand::InputChanged(text) => self.controller.input_changed(&text, now),
            SessionCommand::ClearHistory => {
                if let Err(e) = self.controller.clear_history() {
                    warn!("Clear history not sent: {}", e);
                }
            }
            SessionCommand::Shutdown => {}
        }
    }

    /// Feed one transport event to the controller
    fn handle_transport_event(&mut self, event: TransportEvent) {
        let TransportEvent { conn, kind } = event;
        let now = Instant::now();
        match kind {
            TransportEventKind::Opened(outbound) => {
                let Some(link) = self.links.get_mut(&conn) else {
                    // retired while dialing; dropping the sender closes it
                    debug!("{} opened after retirement", conn);
                    return;
                };
                link.outbound = Some(outbound);
                self.controller.on_transport_open(conn);
            }
            TransportEventKind::Frame(text) => {
                debug!("Received on {}: {}", conn, text);
                self.controller.on_frame(conn, &text, now);
            }
            TransportEventKind::Error(message) => {
                self.controller.on_transport_error(conn, &message);
            }
            TransportEventKind::Closed => {
                self.links.remove(&conn);
                self.controller.on_transport_close(conn, now);
            }
        }
    }

    /// Execute the controller's queued transport commands
    fn execute(&mut self) {
        for command in self.controller.drain_commands() {
            match command {
                TransportCommand::Dial { conn, url } => {
                    let events = self.events_tx.clone();
                    let task = tokio::spawn(async move {
                        if let Err(e) = run_connection(conn, url, events).await {
                            error!("Connection {} ended with error: {}", conn, e);
                        }
                    });
                    self.links.insert(
                        conn,
                        Link {
                            outbound: None,
                            task,
                        },
                    );
                }
                TransportCommand::Send { conn, text } => {
                    let Some(outbound) = self.links.get(&conn).and_then(|l| l.outbound.as_ref())
                    else {
                        warn!("No socket for {}, frame dropped", conn);
                        continue;
                    };
                    deliver(outbound, conn, text, self.controller.view_mut());
                }
                TransportCommand::Close { conn } => {
                    let Some(link) = self.links.remove(&conn) else {
                        continue;
                    };
                    match link.outbound {
                        // dropping the sender ends the write task, which closes the socket
                        Some(outbound) => drop(outbound),
                        None => link.task.abort(),
                    }
                }
            }
        }
    }
}

/// Queue a frame on a connection's write task
///
/// A full or closed queue drops the frame, and the user is told.
fn deliver(
    outbound: &mpsc::Sender<String>,
    conn: ConnectionId,
    text: String,
    view: &mut impl View,
) {
    if let Err(e) = outbound.try_send(text) {
        warn!("Outbound queue for {} rejected frame: {}", conn, e);
        view.on_system_notice("Connection is backed up; a message was not sent");
    }
}

/// Sleep until `deadline`, or forever when there is none
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
