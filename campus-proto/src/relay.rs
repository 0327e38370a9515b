//! Relay wire protocol types.
//!
//! Defines the [`RelayMessage`] enum that is postcard-encoded and sent over
//! WebSocket binary frames between clients and the relay server, plus the
//! [`ConnectionId`] the server assigns to every connection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::RoomPayload;

/// Server-assigned identifier for one live connection, based on UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new time-ordered connection identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `ConnectionId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages exchanged between clients and the relay server.
///
/// Clients send `JoinRoom`, `SendUpdate` and `LeaveRoom`. Everything else is
/// produced by the server and ignored if a client sends it. Rooms are addressed by caller-chosen names and
/// exist only while they have members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayMessage {
    /// Join a room under an application-level identity (e.g. an email).
    JoinRoom {
        /// Identity shown to the other members.
        identity: String,
        /// Room to join. Created on first join.
        room: String,
    },

    /// Forward a payload to every other member of a room the sender is in.
    SendUpdate {
        /// Target room.
        room: String,
        /// Payload to forward unchanged.
        payload: RoomPayload,
    },

    /// Leave a room previously joined.
    LeaveRoom {
        /// Room to leave.
        room: String,
    },

    /// Sent to the joining connection only once its join has been applied.
    JoinAcknowledged {
        /// The room that was joined.
        room: String,
    },

    /// Sent to the other members of a room when a connection joins it.
    MemberJoined {
        /// Room the member joined.
        room: String,
        /// Identity the member joined under.
        identity: String,
        /// Connection the member is using.
        connection_id: ConnectionId,
    },

    /// A payload relayed from another member.
    UpdateReceived {
        /// Room the payload was sent to.
        room: String,
        /// The payload exactly as the sender emitted it.
        payload: RoomPayload,
    },

    /// Sent to the remaining members when a member leaves or disconnects.
    ///
    /// Only emitted when the server has departure announcements enabled.
    MemberLeft {
        /// Room the member left.
        room: String,
        /// Identity of the member, if it was still mapped.
        identity: Option<String>,
        /// Connection that left.
        connection_id: ConnectionId,
    },

    /// Server reports an error condition.
    Error {
        /// Human-readable error description.
        reason: String,
    },
}
