//! Shared protocol definitions for the campus room relay wire format.

pub mod codec;
pub mod payload;
pub mod relay;
