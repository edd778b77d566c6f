//! Wire protocol: one JSON object per WebSocket text frame.
//!
//! Every frame is `{"type": "...", "payload": {...}}`. Client frames
//! flow client → server; server frames flow server → client only.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{RoomId, UserId};

/// The turn-based games the realtime core knows how to referee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameType {
    #[serde(rename = "tictactoe")]
    TicTacToe,
    #[serde(rename = "othello")]
    Othello,
}

impl GameType {
    /// Points awarded to the winner when a match of this game finishes.
    pub fn winner_points(self) -> i64 {
        match self {
            GameType::TicTacToe => 10,
            GameType::Othello => 15,
        }
    }
}

/// Lifecycle of a game room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Pending,
    Active,
    Finished,
    Cancelled,
}

impl RoomStatus {
    /// Terminal rooms accept no further moves.
    pub fn is_terminal(self) -> bool {
        matches!(self, RoomStatus::Finished | RoomStatus::Cancelled)
    }
}

/// A full snapshot of a game room, pushed to clients whenever the room
/// changes. The board layout is game-specific JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub room: RoomId,
    pub game: GameType,
    pub status: RoomStatus,
    pub creator: UserId,
    pub opponent: Option<UserId>,
    pub current_turn: Option<UserId>,
    pub winner: Option<UserId>,
    pub is_draw: bool,
    pub board: Value,
}

/// Machine-readable category on an `error` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed or unintelligible frame.
    Protocol,
    /// Sender is not allowed to act on this room or conversation.
    Forbidden,
    /// Action conflicts with the current room state (wrong turn,
    /// terminal room, illegal move).
    State,
    /// A configured limit was reached.
    Capacity,
    /// The referenced room or conversation does not exist.
    NotFound,
    /// A backing service failed; the request may succeed on retry.
    Unavailable,
}

/// Frames accepted from clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    JoinRoom {
        room: RoomId,
    },
    LeaveRoom {
        room: RoomId,
    },
    CreateRoom {
        game: GameType,
    },
    Rematch {
        room: RoomId,
    },
    MakeMove {
        room: RoomId,
        #[serde(rename = "move")]
        data: Value,
    },
    Message {
        conversation_id: u64,
        content: String,
    },
    Typing {
        conversation_id: u64,
        is_typing: bool,
    },
    Read {
        conversation_id: u64,
    },
    RoomMessage {
        room: RoomId,
        text: String,
    },
    Ping,
}

/// Frames pushed from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    Error {
        code: ErrorCode,
        message: String,
    },
    Connected {
        user_id: UserId,
    },
    Pong,
    RoomState {
        state: GameSnapshot,
    },
    GameState {
        state: GameSnapshot,
    },
    /// Completion notice for off-room UI, delivered to the
    /// participants' user channels.
    RoomUpdated {
        state: GameSnapshot,
    },
    Message {
        conversation_id: u64,
        user_id: UserId,
        content: String,
        sent_at: i64,
    },
    Typing {
        conversation_id: u64,
        user_id: UserId,
        is_typing: bool,
        expires_in_ms: u64,
    },
    Read {
        conversation_id: u64,
        user_id: UserId,
    },
    RoomMessage {
        room: RoomId,
        user_id: UserId,
        text: String,
        sent_at: i64,
    },
    UserStatus {
        user_id: UserId,
        status: PresenceStatus,
    },
    /// Arbitrary push from an unrelated feature (comments, friends, ...)
    /// routed through the core's user channel.
    Notification {
        event: Value,
    },
    /// Best-effort notice that outbound frames were dropped because the
    /// connection's queue was saturated; clients should re-fetch.
    MessagesDropped {
        reason: String,
    },
    Shutdown {
        message: String,
    },
}

/// Online/offline state broadcast on presence transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_uses_type_and_payload_envelope() {
        let frame = ClientFrame::Message {
            conversation_id: 4,
            content: "hi".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["payload"]["conversation_id"], 4);
        assert_eq!(json["payload"]["content"], "hi");
    }

    #[test]
    fn make_move_payload_keeps_raw_move_data() {
        let raw = r#"{"type":"make_move","payload":{"room":"game:3","move":{"row":2,"col":5}}}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ClientFrame::MakeMove { room, data } => {
                assert_eq!(room, RoomId::Game(3));
                assert_eq!(data["row"], 2);
                assert_eq!(data["col"], 5);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn ping_frame_needs_no_payload() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping);
    }

    #[test]
    fn error_frame_round_trips() {
        let frame = ServerFrame::Error {
            code: ErrorCode::State,
            message: "not your turn".into(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn unknown_frame_type_is_a_parse_error() {
        let err = serde_json::from_str::<ClientFrame>(r#"{"type":"warp","payload":{}}"#);
        assert!(err.is_err());
    }
}
