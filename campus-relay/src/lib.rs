//! Campus room relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The server
//! accepts WebSocket connections, lets them join named rooms, and forwards
//! document deltas, whiteboard snapshots and call signaling to the other
//! members of each room.

pub mod config;
pub mod relay;
pub mod rooms;
