//! Mutable state of one game room.

use std::collections::VecDeque;

use serde_json::Value;
use tokio::time::Instant;
use undertow_shared::{RoomId, UserId};
use undertow_shared::protocol::{GameSnapshot, GameType, RoomStatus};

use super::rules::{Board, Mark};

/// Cap on the in-room chat history kept for late joiners.
pub const MAX_ROOM_MESSAGES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomChatMessage {
    pub user_id: UserId,
    pub text: String,
    pub sent_at: i64,
}

pub struct GameRoomState {
    pub room_id: u64,
    pub game: GameType,
    pub board: Board,
    pub status: RoomStatus,
    pub creator: UserId,
    pub opponent: Option<UserId>,
    pub current_turn: Option<UserId>,
    pub winner: Option<UserId>,
    pub is_draw: bool,
    pub move_history: Vec<Value>,
    messages: VecDeque<RoomChatMessage>,
    pub created_at: Instant,
    /// Set when the room turns terminal; drives eviction.
    pub finished_at: Option<Instant>,
}

impl GameRoomState {
    pub fn new(room_id: u64, game: GameType, creator: UserId) -> Self {
        Self {
            room_id,
            game,
            board: Board::new(game),
            status: RoomStatus::Pending,
            creator,
            opponent: None,
            current_turn: None,
            winner: None,
            is_draw: false,
            move_history: Vec::new(),
            messages: VecDeque::new(),
            created_at: Instant::now(),
            finished_at: None,
        }
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.creator == user_id || self.opponent == Some(user_id)
    }

    /// The creator always plays `X` and moves first.
    pub fn mark_of(&self, user_id: UserId) -> Option<Mark> {
        if self.creator == user_id {
            Some(Mark::X)
        } else if self.opponent == Some(user_id) {
            Some(Mark::O)
        } else {
            None
        }
    }

    pub fn user_of(&self, mark: Mark) -> Option<UserId> {
        match mark {
            Mark::X => Some(self.creator),
            Mark::O => self.opponent,
        }
    }

    pub fn other_participant(&self, user_id: UserId) -> Option<UserId> {
        if self.creator == user_id {
            self.opponent
        } else if self.opponent == Some(user_id) {
            Some(self.creator)
        } else {
            None
        }
    }

    /// Appends a room chat message, evicting the oldest past the cap.
    pub fn push_message(&mut self, message: RoomChatMessage) {
        if self.messages.len() >= MAX_ROOM_MESSAGES {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub fn recent_messages(&self) -> impl Iterator<Item = &RoomChatMessage> {
        self.messages.iter()
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            room: RoomId::Game(self.room_id),
            game: self.game,
            status: self.status,
            creator: self.creator,
            opponent: self.opponent,
            current_turn: self.current_turn,
            winner: self.winner,
            is_draw: self.is_draw,
            board: self.board.to_json(),
        }
    }
}
