//! Connection and room registry for the relay server.
//!
//! One [`RoomRegistry`] exists per server. It owns every table the relay
//! needs: live connections and their outboxes, room membership, and the
//! identity <-> connection mapping used for presence. Rooms are created on
//! first join and removed as soon as their last member leaves or
//! disconnects.
//!
//! Every operation takes the registry lock, applies its mutation, queues the
//! resulting frames on the recipients' outboxes and returns. Nothing awaits
//! while the lock is held, so each operation is atomic with respect to the
//! others, and fan-out never blocks on a slow recipient.
//!
//! All state is process-local. Running several relay processes behind a load
//! balancer would split rooms between them.

use std::collections::{HashMap, HashSet};

use axum::extract::ws::Message;
use campus_proto::codec;
use campus_proto::payload::RoomPayload;
use campus_proto::relay::{ConnectionId, RelayMessage};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Sending half of a connection's outbound frame queue.
pub type Outbox = mpsc::UnboundedSender<Message>;

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A join was attempted without an identity.
    #[error("identity must not be empty")]
    EmptyIdentity,
    /// A join or relay named no room.
    #[error("room name must not be empty")]
    EmptyRoomName,
    /// The connection is not a member of the room it addressed.
    #[error("not a member of room {room}")]
    NotAMember {
        /// The room that was addressed.
        room: String,
    },
    /// The connection is not (or no longer) registered.
    #[error("unknown connection")]
    UnknownConnection,
}

/// Counts exposed for health checks and logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Live connections.
    pub connections: usize,
    /// Rooms with at least one member.
    pub rooms: usize,
    /// Identities currently mapped to a connection.
    pub identities: usize,
}

/// A live connection.
struct ConnectionEntry {
    outbox: Outbox,
    identity: Option<String>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct Tables {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
    identities: HashMap<String, ConnectionId>,
}

/// Registry of connections, rooms and identities.
pub struct RoomRegistry {
    tables: Mutex<Tables>,
    announce_departures: bool,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    /// Creates an empty registry that does not announce departures.
    #[must_use]
    pub fn new() -> Self {
        Self::with_departure_announcements(false)
    }

    /// Creates an empty registry.
    ///
    /// When `announce_departures` is set, remaining members receive a
    /// [`RelayMessage::MemberLeft`] whenever someone leaves a room or
    /// disconnects.
    #[must_use]
    pub fn with_departure_announcements(announce_departures: bool) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            announce_departures,
        }
    }

    /// Registers a new connection and returns its identifier.
    pub fn connect(&self, outbox: Outbox) -> ConnectionId {
        let id = ConnectionId::new();
        self.tables.lock().connections.insert(
            id,
            ConnectionEntry {
                outbox,
                identity: None,
                rooms: HashSet::new(),
            },
        );
        id
    }

    /// Adds a connection to a room under the given identity.
    ///
    /// The other members receive a [`RelayMessage::MemberJoined`] and the
    /// joining connection receives a [`RelayMessage::JoinAcknowledged`].
    /// Repeating a join the connection already holds under the same identity
    /// is acknowledged again but not re-announced. A later join with the same
    /// identity takes the identity over from whichever connection held it
    /// before.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EmptyIdentity`] or
    /// [`RegistryError::EmptyRoomName`] for incomplete requests, in which
    /// case nothing changes and nothing is sent, or
    /// [`RegistryError::UnknownConnection`] if `conn` is not registered.
    pub fn join(&self, conn: ConnectionId, identity: &str, room: &str) -> Result<(), RegistryError> {
        if identity.is_empty() {
            return Err(RegistryError::EmptyIdentity);
        }
        if room.is_empty() {
            return Err(RegistryError::EmptyRoomName);
        }

        let mut tables = self.tables.lock();
        let Some(entry) = tables.connections.get_mut(&conn) else {
            return Err(RegistryError::UnknownConnection);
        };

        let previous_identity = entry.identity.replace(identity.to_string());
        entry.rooms.insert(room.to_string());
        let identity_changed = previous_identity.as_deref() != Some(identity);

        if let Some(previous) = previous_identity
            && identity_changed
            && tables.identities.get(&previous) == Some(&conn)
        {
            tables.identities.remove(&previous);
        }
        if let Some(displaced) = tables.identities.insert(identity.to_string(), conn)
            && displaced != conn
            && let Some(old) = tables.connections.get_mut(&displaced)
        {
            tracing::debug!(
                identity = %identity,
                old_connection = %displaced,
                new_connection = %conn,
                "identity taken over by newer connection"
            );
            old.identity = None;
        }

        let members = tables.rooms.entry(room.to_string()).or_default();
        let created = members.is_empty();
        let newly_joined = members.insert(conn);

        if newly_joined || identity_changed {
            let announcement = RelayMessage::MemberJoined {
                room: room.to_string(),
                identity: identity.to_string(),
                connection_id: conn,
            };
            broadcast(&tables, room, Some(conn), &announcement);
        }

        let ack = RelayMessage::JoinAcknowledged {
            room: room.to_string(),
        };
        send(&tables, conn, &ack);

        tracing::info!(
            connection_id = %conn,
            identity = %identity,
            room = %room,
            created,
            newly_joined,
            "joined room"
        );
        Ok(())
    }

    /// Forwards a payload to every other member of `room`.
    ///
    /// Returns the number of members the payload was queued for. The
    /// sender never receives its own payload.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotAMember`] if `conn` has not joined `room`.
    /// No membership is created implicitly.
    pub fn relay(
        &self,
        conn: ConnectionId,
        room: &str,
        payload: RoomPayload,
    ) -> Result<usize, RegistryError> {
        let tables = self.tables.lock();
        let Some(entry) = tables.connections.get(&conn) else {
            return Err(RegistryError::UnknownConnection);
        };
        if !entry.rooms.contains(room) {
            return Err(RegistryError::NotAMember {
                room: room.to_string(),
            });
        }

        let kind = payload.kind();
        let size = payload.len();
        let msg = RelayMessage::UpdateReceived {
            room: room.to_string(),
            payload,
        };
        let delivered = broadcast(&tables, room, Some(conn), &msg);
        drop(tables);

        tracing::debug!(
            connection_id = %conn,
            room = %room,
            kind,
            size,
            recipients = delivered,
            "relayed update"
        );
        Ok(delivered)
    }

    /// Removes a connection from one room, deleting the room if it empties.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotAMember`] if `conn` has not joined `room`.
    pub fn leave(&self, conn: ConnectionId, room: &str) -> Result<(), RegistryError> {
        let mut tables = self.tables.lock();
        let Some(entry) = tables.connections.get_mut(&conn) else {
            return Err(RegistryError::UnknownConnection);
        };
        if !entry.rooms.remove(room) {
            return Err(RegistryError::NotAMember {
                room: room.to_string(),
            });
        }
        let identity = entry.identity.clone();

        remove_member(&mut tables, room, conn);
        if self.announce_departures {
            announce_departure(&tables, room, conn, identity);
        }

        tracing::info!(connection_id = %conn, room = %room, "left room");
        Ok(())
    }

    /// Tears down a connection.
    ///
    /// Drops its identity mapping (unless a newer connection has since taken
    /// the identity over), removes it from every room it joined and deletes
    /// rooms left without members. Unknown connections are ignored.
    pub fn disconnect(&self, conn: ConnectionId) {
        let mut tables = self.tables.lock();
        let Some(entry) = tables.connections.remove(&conn) else {
            return;
        };

        if let Some(identity) = &entry.identity
            && tables.identities.get(identity) == Some(&conn)
        {
            tables.identities.remove(identity);
        }

        for room in &entry.rooms {
            remove_member(&mut tables, room, conn);
            if self.announce_departures {
                announce_departure(&tables, room, conn, entry.identity.clone());
            }
        }

        tracing::info!(
            connection_id = %conn,
            identity = ?entry.identity,
            rooms = entry.rooms.len(),
            "connection removed"
        );
    }

    /// Returns the identity a connection last joined under.
    #[must_use]
    pub fn identity_of(&self, conn: ConnectionId) -> Option<String> {
        self.tables
            .lock()
            .connections
            .get(&conn)
            .and_then(|e| e.identity.clone())
    }

    /// Returns the connection currently holding an identity.
    #[must_use]
    pub fn connection_for(&self, identity: &str) -> Option<ConnectionId> {
        self.tables.lock().identities.get(identity).copied()
    }

    /// Returns the members of a room, or an empty list if it does not exist.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        let mut members: Vec<ConnectionId> = self
            .tables
            .lock()
            .rooms
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        members.sort_unstable();
        members
    }

    /// Number of rooms that currently have members.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.tables.lock().rooms.len()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.tables.lock().connections.len()
    }

    /// Snapshot of the registry counters.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let tables = self.tables.lock();
        RegistryStats {
            connections: tables.connections.len(),
            rooms: tables.rooms.len(),
            identities: tables.identities.len(),
        }
    }

    /// Queues a frame for every live connection.
    pub(crate) fn send_to_all(&self, msg: &Message) {
        let tables = self.tables.lock();
        for (id, entry) in &tables.connections {
            tracing::debug!(connection_id = %id, "queueing frame for connection");
            let _ = entry.outbox.send(msg.clone());
        }
    }

    /// Queues a message for a single connection.
    pub(crate) fn send_to(&self, conn: ConnectionId, msg: &RelayMessage) {
        send(&self.tables.lock(), conn, msg);
    }
}

/// Removes `conn` from `room`, deleting the room once it is empty.
fn remove_member(tables: &mut Tables, room: &str, conn: ConnectionId) {
    if let Some(members) = tables.rooms.get_mut(room) {
        members.remove(&conn);
        if members.is_empty() {
            tables.rooms.remove(room);
            tracing::debug!(room = %room, "removed empty room");
        }
    }
}

fn announce_departure(tables: &Tables, room: &str, conn: ConnectionId, identity: Option<String>) {
    let msg = RelayMessage::MemberLeft {
        room: room.to_string(),
        identity,
        connection_id: conn,
    };
    broadcast(tables, room, None, &msg);
}

/// Encodes a message into a binary frame.
fn frame(msg: &RelayMessage) -> Option<Message> {
    match codec::encode(msg) {
        Ok(bytes) => Some(Message::Binary(bytes.into())),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode relay message");
            None
        }
    }
}

/// Queues `msg` for every member of `room` except `skip`.
///
/// The frame is encoded once and shared between recipients. Returns how many
/// outboxes accepted it; a closed outbox just means the frame is dropped.
fn broadcast(
    tables: &Tables,
    room: &str,
    skip: Option<ConnectionId>,
    msg: &RelayMessage,
) -> usize {
    let Some(members) = tables.rooms.get(room) else {
        return 0;
    };
    let Some(frame) = frame(msg) else {
        return 0;
    };

    members
        .iter()
        .filter(|id| Some(**id) != skip)
        .filter_map(|id| tables.connections.get(id))
        .filter(|entry| entry.outbox.send(frame.clone()).is_ok())
        .count()
}

fn send(tables: &Tables, conn: ConnectionId, msg: &RelayMessage) {
    if let Some(entry) = tables.connections.get(&conn)
        && let Some(frame) = frame(msg)
    {
        let _ = entry.outbox.send(frame);
    }
}
