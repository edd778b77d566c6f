//! Durable match results.
//!
//! The host application owns player stats; the core hands over one
//! record per finished room. Recording must be idempotent on room id so
//! a redelivered completion never double-awards points.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use undertow_shared::UserId;
use undertow_shared::protocol::GameType;

use crate::error::CollabError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameOutcomeRecord {
    pub room_id: u64,
    pub game: GameType,
    pub creator: UserId,
    pub opponent: Option<UserId>,
    /// `None` on a draw.
    pub winner: Option<UserId>,
    pub is_draw: bool,
    /// Points awarded to the winner; zero on a draw.
    pub points: i64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    async fn record(&self, outcome: &GameOutcomeRecord) -> Result<(), CollabError>;
}

/// Per-user running tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerStats {
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    pub points: i64,
}

/// In-process outcome store for tests and store-less deployments.
#[derive(Default)]
pub struct MemoryOutcomeStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    recorded: HashMap<u64, GameOutcomeRecord>,
    stats: HashMap<u64, PlayerStats>,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self, user_id: UserId) -> PlayerStats {
        self.inner
            .lock()
            .expect("outcome store poisoned")
            .stats
            .get(&user_id.0)
            .copied()
            .unwrap_or_default()
    }

    pub fn recorded(&self, room_id: u64) -> Option<GameOutcomeRecord> {
        self.inner
            .lock()
            .expect("outcome store poisoned")
            .recorded
            .get(&room_id)
            .cloned()
    }
}

#[async_trait]
impl OutcomeStore for MemoryOutcomeStore {
    async fn record(&self, outcome: &GameOutcomeRecord) -> Result<(), CollabError> {
        let mut inner = self.inner.lock().expect("outcome store poisoned");
        if inner.recorded.contains_key(&outcome.room_id) {
            return Ok(());
        }
        inner.recorded.insert(outcome.room_id, outcome.clone());

        let participants = [Some(outcome.creator), outcome.opponent];
        for user in participants.into_iter().flatten() {
            let stats = inner.stats.entry(user.0).or_default();
            if outcome.is_draw {
                stats.draws += 1;
            } else if outcome.winner == Some(user) {
                stats.wins += 1;
                stats.points += outcome.points;
            } else {
                stats.losses += 1;
            }
        }
        Ok(())
    }
}
