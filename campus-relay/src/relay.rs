//! Relay server core: shared state, WebSocket handler and message dispatch.
//!
//! Each WebSocket connection is registered with the [`RoomRegistry`] as soon
//! as it is upgraded. A writer task drains the connection's outbox into the
//! socket while the reader loop decodes client frames and applies them to
//! the registry. When either side stops, the connection is removed from the
//! registry along with its room memberships and identity mapping.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use campus_proto::codec;
use campus_proto::relay::{ConnectionId, RelayMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::rooms::{RegistryError, RoomRegistry};

/// Shared relay server state.
pub struct RelayState {
    /// Connections, rooms and identities.
    pub registry: RoomRegistry,
    /// Largest WebSocket message accepted from a client, if capped below
    /// the transport default.
    max_message_size: Option<usize>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with an empty registry and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: RoomRegistry::new(),
            max_message_size: None,
        }
    }

    /// Creates relay state from a resolved configuration.
    #[must_use]
    pub fn with_config(config: &RelayConfig) -> Self {
        Self {
            registry: RoomRegistry::with_departure_announcements(config.announce_departures),
            max_message_size: config.max_message_size,
        }
    }

    /// Send a WebSocket Close frame to every connection.
    ///
    /// Each writer task forwards the frame and the client side then tears
    /// the connection down. Used for graceful shutdown and in tests.
    pub fn close_all_connections(&self) {
        tracing::info!(
            connections = self.registry.connection_count(),
            "closing all connections"
        );
        self.registry.send_to_all(&Message::Close(None));
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Register the connection and obtain its [`ConnectionId`].
/// 2. Spawn a writer task that forwards queued frames to the socket.
/// 3. Read client frames and apply them to the registry.
/// 4. On close, read error or write failure, remove the connection.
///
/// A client that reconnects gets a fresh connection id and has to join its
/// rooms again.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn = state.registry.connect(tx);
    tracing::info!(connection_id = %conn, "connection opened");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(connection_id = %conn, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Binary(data)) => {
                    handle_binary_message(conn, &data, &reader_state);
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %conn, "received close frame");
                    break;
                }
                Ok(_) => {
                    // Ignore text, ping, pong frames.
                }
                Err(e) => {
                    tracing::warn!(connection_id = %conn, error = %e, "WebSocket read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.registry.disconnect(conn);
    tracing::info!(connection_id = %conn, "connection closed");
}

/// Decodes and applies one binary frame from a client.
fn handle_binary_message(conn: ConnectionId, data: &[u8], state: &RelayState) {
    let msg = match codec::decode(data) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(connection_id = %conn, error = %e, "failed to decode message");
            reply_error(state, conn, &format!("malformed message: {e}"));
            return;
        }
    };

    match msg {
        RelayMessage::JoinRoom { identity, room } => {
            if let Err(e) = state.registry.join(conn, &identity, &room) {
                // Incomplete joins are dropped without telling the client.
                tracing::warn!(
                    connection_id = %conn,
                    identity = %identity,
                    room = %room,
                    error = %e,
                    "ignoring join request"
                );
            }
        }
        RelayMessage::SendUpdate { room, payload } => {
            if let Err(e) = state.registry.relay(conn, &room, payload) {
                tracing::warn!(
                    connection_id = %conn,
                    room = %room,
                    error = %e,
                    "rejected update"
                );
                reply_error(state, conn, &e.to_string());
            }
        }
        RelayMessage::LeaveRoom { room } => match state.registry.leave(conn, &room) {
            Ok(()) => {}
            Err(e @ RegistryError::NotAMember { .. }) => {
                tracing::debug!(connection_id = %conn, room = %room, error = %e, "leave ignored");
            }
            Err(e) => {
                tracing::warn!(connection_id = %conn, room = %room, error = %e, "leave failed");
            }
        },
        other => {
            tracing::warn!(
                connection_id = %conn,
                msg = ?other,
                "unexpected message type from client"
            );
        }
    }
}

fn reply_error(state: &RelayState, conn: ConnectionId, reason: &str) {
    let err = RelayMessage::Error {
        reason: reason.to_string(),
    };
    state.registry.send_to(conn, &err);
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/health", axum::routing::get(health_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port) and returns the bound address
/// and a [`tokio::task::JoinHandle`] for cleanup.
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    let ws = match state.max_message_size {
        Some(max) => ws.max_message_size(max),
        None => ws,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Liveness probe reporting registry counters.
async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> String {
    let stats = state.registry.stats();
    format!(
        "ok connections={} rooms={} identities={}\n",
        stats.connections, stats.rooms, stats.identities
    )
}
