//! Error taxonomy for the realtime core.
//!
//! Component-local errors (protocol, authorization, state) are resolved
//! at the point of origin and reported only to the originating sender.
//! Infrastructure errors degrade gracefully and are never surfaced to
//! end users directly.

use thiserror::Error;
use undertow_shared::protocol::ErrorCode;

/// Failure talking to the shared store (Redis).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Startup configuration problems. Fatal: the process must not come up
/// half-configured.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Ticket handshake failures. All map to an unauthorized upgrade.
#[derive(Debug, Error)]
pub enum TicketError {
    #[error("ticket is invalid, expired, or already consumed")]
    Invalid,
    #[error("ticket store unavailable")]
    Store(#[from] StoreError),
}

/// Collaborator lookups (membership, outcome persistence).
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("membership lookup failed: {0}")]
    Membership(String),
    #[error("outcome persistence failed: {0}")]
    Outcome(String),
}

/// Chat-level rejections, reported to the sender only.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("not a member of conversation {0}")]
    NotMember(u64),
    #[error(transparent)]
    Collab(#[from] CollabError),
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::NotMember(_) => ErrorCode::Forbidden,
            // An infrastructure failure is retryable, not a verdict on
            // the sender's permissions.
            ChatError::Collab(_) => ErrorCode::Unavailable,
        }
    }
}

/// Game room rejections, reported to the sender only, never broadcast.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("game room {0} not found")]
    RoomNotFound(u64),
    #[error("you are not a participant of this room")]
    NotParticipant,
    #[error("room already has two participants")]
    RoomFull,
    #[error("game has not started yet")]
    NotStarted,
    #[error("game is still in progress")]
    NotFinished,
    #[error("game is already over")]
    Terminal,
    #[error("not your turn")]
    OutOfTurn,
    #[error("illegal move: {0}")]
    IllegalMove(String),
    #[error("open game room limit reached")]
    RoomCapacity,
}

impl GameError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GameError::RoomNotFound(_) => ErrorCode::NotFound,
            GameError::NotParticipant => ErrorCode::Forbidden,
            GameError::RoomCapacity => ErrorCode::Capacity,
            GameError::RoomFull
            | GameError::NotStarted
            | GameError::NotFinished
            | GameError::Terminal
            | GameError::OutOfTurn
            | GameError::IllegalMove(_) => ErrorCode::State,
        }
    }
}

/// Per-user connection limit, enforced at registration time.
#[derive(Debug, Error)]
#[error("connection limit reached for user {user_id} ({limit})")]
pub struct ConnectionLimitError {
    pub user_id: undertow_shared::UserId,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_error_codes_separate_authorization_from_outages() {
        assert_eq!(ChatError::NotMember(3).code(), ErrorCode::Forbidden);
        let infra = ChatError::from(CollabError::Membership("lookup timed out".into()));
        assert_eq!(infra.code(), ErrorCode::Unavailable);
    }
}
