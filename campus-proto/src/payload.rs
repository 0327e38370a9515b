//! Payloads carried between members of a room.
//!
//! The relay forwards these unchanged. The variants only exist so that
//! clients get a typed view of what they send and receive; the server never
//! looks inside them beyond [`RoomPayload::kind`] for log output.

use serde::{Deserialize, Serialize};

/// A payload relayed to the other members of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomPayload {
    /// An edit delta produced by the collaborative document editor.
    DocumentDelta(Vec<u8>),
    /// A full snapshot of the shared whiteboard canvas.
    WhiteboardSnapshot(Vec<u8>),
    /// A video-call signaling message.
    Signal(SignalMessage),
    /// Any other client-defined payload.
    Opaque(Vec<u8>),
}

impl RoomPayload {
    /// Short label for the payload variant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DocumentDelta(_) => "document-delta",
            Self::WhiteboardSnapshot(_) => "whiteboard-snapshot",
            Self::Signal(_) => "signal",
            Self::Opaque(_) => "opaque",
        }
    }

    /// Size of the carried body in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::DocumentDelta(b) | Self::WhiteboardSnapshot(b) | Self::Opaque(b) => b.len(),
            Self::Signal(s) => s.body.len(),
        }
    }

    /// Returns `true` if the carried body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// WebRTC signaling exchanged while setting up a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    /// Which step of the negotiation this is.
    pub kind: SignalKind,
    /// SDP or ICE candidate text, as produced by the browser.
    pub body: String,
}

/// Signaling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// SDP offer from the caller.
    Offer,
    /// SDP answer from the callee.
    Answer,
    /// Trickled ICE candidate.
    IceCandidate,
    /// The sender ended the call.
    Hangup,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
            Self::IceCandidate => write!(f, "ice-candidate"),
            Self::Hangup => write!(f, "hangup"),
        }
    }
}
