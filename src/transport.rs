//! WebSocket transport
//!
//! Runs one client connection: dial, then bidirectional communication
//! between the socket and the session runtime. Every event is tagged with
//! the connection's id so the runtime can drop events from retired sockets.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::types::ConnectionId;

/// Outbound frames buffered per connection
const OUTBOUND_BUFFER_SIZE: usize = 64;

/// What happened on a connection
#[derive(Debug)]
pub enum TransportEventKind {
    /// Socket open; frames written to the sender go out on it
    Opened(mpsc::Sender<String>),
    /// One text frame arrived
    Frame(String),
    /// Socket-level failure (a `Closed` follows)
    Error(String),
    /// Socket gone
    Closed,
}

/// Transport event tagged with its connection
#[derive(Debug)]
pub struct TransportEvent {
    pub conn: ConnectionId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    fn new(conn: ConnectionId, kind: TransportEventKind) -> Self {
        Self { conn, kind }
    }
}

/// Dial `url` and pump the connection until either side ends it
///
/// A failed dial is reported as `Error` then `Closed` so it enters the
/// reconnect cycle like any other loss. Dropping the `Opened` sender closes
/// the socket.
pub async fn run_connection(
    conn: ConnectionId,
    url: String,
    events: mpsc::Sender<TransportEvent>,
) -> Result<(), SessionError> {
    debug!("Dialing {} for {}", url, conn);

    let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            error!("Dial of {} failed for {}: {}", url, conn, e);
            let _ = events
                .send(TransportEvent::new(conn, TransportEventKind::Error(e.to_string())))
                .await;
            let _ = events
                .send(TransportEvent::new(conn, TransportEventKind::Closed))
                .await;
            return Err(e.into());
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    info!("{} connected to {}", conn, url);

    // Create channel for session -> server frames
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER_SIZE);
    if events
        .send(TransportEvent::new(conn, TransportEventKind::Opened(out_tx)))
        .await
        .is_err()
    {
        error!("Session runtime gone, abandoning {}", conn);
        return Err(SessionError::ChannelSend);
    }

    // Spawn read task (WebSocket -> TransportEvent)
    let events_read = events.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    let event = TransportEvent::new(conn, TransportEventKind::Frame(text.to_string()));
                    if events_read.send(event).await.is_err() {
                        debug!("Runtime closed, ending read task for {}", conn);
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("Server sent close frame on {}", conn);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Ping on {}", conn);
                }
                Ok(_) => {
                    // Binary and pong frames carry nothing for us
                }
                Err(e) => {
                    warn!("WebSocket error on {}: {}", conn, e);
                    let _ = events_read
                        .send(TransportEvent::new(conn, TransportEventKind::Error(e.to_string())))
                        .await;
                    break;
                }
            }
        }
        debug!("Read task ended for {}", conn);
    });

    // Spawn write task (session -> WebSocket)
    let mut write_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                debug!("WebSocket send failed, ending write task for {}", conn);
                break;
            }
        }
        debug!("Write task ended for {}", conn);

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    // Wait for either task to complete, then stop the other
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    let _ = events
        .send(TransportEvent::new(conn, TransportEventKind::Closed))
        .await;
    info!("{} closed", conn);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_dial_reports_error_then_close() {
        let (tx, mut rx) = mpsc::channel(8);
        // nothing listens on port 1
        let result = run_connection(ConnectionId(7), "ws://127.0.0.1:1".to_string(), tx).await;
        assert!(result.is_err());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.conn, ConnectionId(7));
        assert!(matches!(first.kind, TransportEventKind::Error(_)));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second.kind, TransportEventKind::Closed));
    }

    #[tokio::test]
    async fn test_invalid_url_reports_error() {
        let (tx, mut rx) = mpsc::channel(8);
        assert!(run_connection(ConnectionId(1), "not a url".to_string(), tx)
            .await
            .is_err());
        assert!(matches!(
            rx.recv().await.map(|e| e.kind),
            Some(TransportEventKind::Error(_))
        ));
    }
}
