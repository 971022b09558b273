//! Chat Session Client - Entry Point
//!
//! Starts the session runtime and a terminal front end reading stdin.

use std::env;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_session::{
    AuthRequest, ChannelView, FileCredentialStore, SessionCommand, SessionConfig, SessionRuntime,
    SessionState, ViewEvent,
};

const USAGE: &str = "commands: /login <handle> <password> | \
/register <handle> <display name> <password> <confirm> | /logout | /clear | /quit";

/// What one line of terminal input asks for
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Command(SessionCommand),
    Chat(String),
    Quit,
    Usage,
    Empty,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if !line.starts_with('/') {
        return Input::Chat(line.to_string());
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["/login", handle, password] => {
            Input::Command(SessionCommand::Authenticate(AuthRequest::login(*handle, *password)))
        }
        ["/register", handle, display_name, password, confirm] => {
            Input::Command(SessionCommand::Authenticate(AuthRequest::register(
                *handle,
                *display_name,
                *password,
                *confirm,
            )))
        }
        ["/logout"] => Input::Command(SessionCommand::Logout),
        ["/clear"] => Input::Command(SessionCommand::ClearHistory),
        ["/quit"] => Input::Quit,
        _ => Input::Usage,
    }
}

fn render(event: &ViewEvent) -> String {
    match event {
        ViewEvent::SystemNotice(text) => format!("* {}", text),
        ViewEvent::ChatMessage {
            user,
            text,
            received_at,
        } => format!("[{}] {}: {}", received_at.format("%H:%M:%S"), user, text),
        ViewEvent::TypingStart(user) => format!("  {} is typing...", user),
        ViewEvent::TypingStop(user) => format!("  {} stopped typing", user),
        ViewEvent::AuthResult {
            success: true,
            ..
        } => "* Signed in".to_string(),
        ViewEvent::AuthResult {
            success: false,
            error,
        } => format!(
            "* Sign-in failed: {}",
            error.as_deref().unwrap_or("unknown error")
        ),
        ViewEvent::StateChange(state) => {
            let label = match state {
                SessionState::LoggedOut => "logged out",
                SessionState::Authenticating => "authenticating",
                SessionState::Connected => "connected",
                SessionState::Reconnecting => "reconnecting",
            };
            format!("* Session {}", label)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_session=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_session=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Server URL from command line overrides the environment
    let mut config = SessionConfig::from_env();
    if let Some(url) = env::args().nth(1) {
        config.server_url = url;
    }
    info!("Chat session client targeting {}", config.server_url);

    let store = FileCredentialStore::new(config.credentials_path.clone())
        .with_policy(config.decode_failure_policy);
    let (view, mut view_events) = ChannelView::new();
    let (runtime, handle) = SessionRuntime::new(&config, store, view);
    let runtime_task = tokio::spawn(runtime.run());

    // Printer task
    tokio::spawn(async move {
        while let Some(event) = view_events.recv().await {
            println!("{}", render(&event));
        }
    });

    println!("{}", USAGE);

    // Terminal input loop
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let result = match parse_input(&line) {
            Input::Command(command) => handle.send(command).await,
            Input::Chat(text) => match handle.input_changed(text.clone()).await {
                Ok(()) => handle.send_message(text).await,
                Err(e) => Err(e),
            },
            Input::Quit => break,
            Input::Usage => {
                println!("{}", USAGE);
                Ok(())
            }
            Input::Empty => Ok(()),
        };
        if let Err(e) = result {
            error!("Session runtime unavailable: {}", e);
            break;
        }
    }

    let _ = handle.shutdown().await;
    runtime_task.await?;
    info!("Chat session client stopped");

    Ok(())
}
