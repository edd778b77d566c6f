//! Types shared between the undertow realtime server and its clients.
//!
//! Contains the wire protocol (one JSON object per WebSocket frame) and
//! the id newtypes used across the realtime core.

pub mod ids;
pub mod protocol;

pub use ids::{ConnectionId, RoomId, UserId};
pub use protocol::{ClientFrame, ErrorCode, GameType, ServerFrame};
