//! Turn-based game rooms.
//!
//! Room state lives in this process; a per-room async mutex serializes
//! every mutation, so two simultaneous moves can never interleave.
//! State-changing events are published to the room's bus channel and
//! fanned out by the subscription, the same exactly-once path chat
//! uses. Rejections (wrong turn, illegal move, finished room) are the
//! caller's `Err` and go to the offending sender only.
//!
//! A dropped socket detaches the connection from delivery but leaves
//! the room state machine alone; the player can reconnect and resume.
//! Only an explicit leave cancels a room.

pub mod outcome;
pub mod room;
pub mod rules;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use undertow_shared::{RoomId, ServerFrame, UserId};
use undertow_shared::protocol::{GameSnapshot, GameType, RoomStatus};

use crate::chat::user_channel;
use crate::connection::ConnectionHandle;
use crate::error::GameError;
use crate::hub::Hub;
use crate::notifier::Notifier;

pub use outcome::{GameOutcomeRecord, MemoryOutcomeStore, OutcomeStore, PlayerStats};
pub use room::{GameRoomState, MAX_ROOM_MESSAGES, RoomChatMessage};
pub use rules::{Board, BoardOutcome, Mark};

fn room_key(room_id: u64) -> String {
    RoomId::Game(room_id).to_string()
}

fn bus_channel(room_id: u64) -> String {
    format!("game:room:{room_id}")
}

pub struct GameHub {
    hub: Arc<Hub>,
    notifier: Arc<Notifier>,
    outcomes: Arc<dyn OutcomeStore>,
    rooms: RwLock<HashMap<u64, Arc<Mutex<GameRoomState>>>>,
    next_room_id: AtomicU64,
    open_rooms: AtomicUsize,
    max_open_rooms: usize,
}

impl GameHub {
    pub fn new(
        hub: Arc<Hub>,
        notifier: Arc<Notifier>,
        outcomes: Arc<dyn OutcomeStore>,
        max_open_rooms: usize,
    ) -> Self {
        Self {
            hub,
            notifier,
            outcomes,
            rooms: RwLock::new(HashMap::new()),
            next_room_id: AtomicU64::new(0),
            open_rooms: AtomicUsize::new(0),
            max_open_rooms,
        }
    }

    /// Opens a pending room with the caller as creator. The creator is
    /// attached to the room's delivery channel immediately.
    pub fn create_room(
        &self,
        handle: &ConnectionHandle,
        game: GameType,
    ) -> Result<GameSnapshot, GameError> {
        // The slot is reserved atomically; racing creators cannot push
        // the count past the limit.
        if self
            .open_rooms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < self.max_open_rooms).then_some(open + 1)
            })
            .is_err()
        {
            return Err(GameError::RoomCapacity);
        }
        let room_id = self.next_room_id.fetch_add(1, Ordering::Relaxed) + 1;
        let state = GameRoomState::new(room_id, game, handle.user_id);
        let snapshot = state.snapshot();

        self.rooms
            .write()
            .expect("game rooms lock poisoned")
            .insert(room_id, Arc::new(Mutex::new(state)));
        self.hub.join(&room_key(room_id), handle.clone());

        tracing::info!(room_id, game = ?game, creator = %handle.user_id, "game room created");
        Ok(snapshot)
    }

    /// Joins or re-attaches to a room. The second distinct player
    /// activates a pending room, with the creator to move first; a
    /// participant re-attaching (after a reconnect) gets the current
    /// snapshot and the recent room chat replayed.
    pub async fn join_room(
        &self,
        handle: &ConnectionHandle,
        room_id: u64,
    ) -> Result<GameSnapshot, GameError> {
        let room = self.room(room_id)?;
        let mut state = room.lock().await;
        let user_id = handle.user_id;

        let activated = match (state.status, state.is_participant(user_id)) {
            (RoomStatus::Pending, false) => {
                state.opponent = Some(user_id);
                state.status = RoomStatus::Active;
                state.current_turn = Some(state.creator);
                tracing::info!(room_id, opponent = %user_id, "game room activated");
                true
            }
            (_, true) => false,
            (RoomStatus::Active, false) => return Err(GameError::RoomFull),
            (_, false) => return Err(GameError::NotParticipant),
        };

        self.hub.join(&room_key(room_id), handle.clone());
        for message in state.recent_messages() {
            handle.send(ServerFrame::RoomMessage {
                room: RoomId::Game(room_id),
                user_id: message.user_id,
                text: message.text.clone(),
                sent_at: message.sent_at,
            });
        }

        let snapshot = state.snapshot();
        drop(state);
        if activated {
            // The joiner is already attached, so the activation
            // broadcast reaches them too; no separate reply.
            self.publish_or_deliver(room_id, ServerFrame::RoomState {
                state: snapshot.clone(),
            })
            .await;
        } else {
            handle.send(ServerFrame::RoomState {
                state: snapshot.clone(),
            });
        }
        Ok(snapshot)
    }

    /// Applies one move. Turn order and legality are checked under the
    /// room lock; a finishing move records the outcome and notifies the
    /// participants' user channels on top of the room broadcast.
    pub async fn make_move(
        &self,
        user_id: UserId,
        room_id: u64,
        data: &Value,
    ) -> Result<(), GameError> {
        let room = self.room(room_id)?;
        let mut state = room.lock().await;

        if !state.is_participant(user_id) {
            return Err(GameError::NotParticipant);
        }
        match state.status {
            RoomStatus::Pending => return Err(GameError::NotStarted),
            RoomStatus::Active => {}
            RoomStatus::Finished | RoomStatus::Cancelled => return Err(GameError::Terminal),
        }
        if state.current_turn != Some(user_id) {
            return Err(GameError::OutOfTurn);
        }
        let mark = state.mark_of(user_id).ok_or(GameError::NotParticipant)?;

        state.board.apply(mark, data)?;
        state.move_history.push(data.clone());

        let finished = match state.board.outcome() {
            Some(BoardOutcome::Win(winning_mark)) => {
                state.status = RoomStatus::Finished;
                state.winner = state.user_of(winning_mark);
                state.current_turn = None;
                state.finished_at = Some(Instant::now());
                true
            }
            Some(BoardOutcome::Draw) => {
                state.status = RoomStatus::Finished;
                state.is_draw = true;
                state.current_turn = None;
                state.finished_at = Some(Instant::now());
                true
            }
            None => {
                let next = mark.other();
                // Forced pass: an opponent with no legal move skips,
                // the turn stays with the mover.
                state.current_turn = if state.board.has_any_move(next) {
                    state.user_of(next)
                } else {
                    Some(user_id)
                };
                false
            }
        };

        let snapshot = state.snapshot();
        if finished {
            self.open_rooms.fetch_sub(1, Ordering::AcqRel);
            let record = GameOutcomeRecord {
                room_id,
                game: state.game,
                creator: state.creator,
                opponent: state.opponent,
                winner: state.winner,
                is_draw: state.is_draw,
                points: if state.winner.is_some() {
                    state.game.winner_points()
                } else {
                    0
                },
            };
            drop(state);
            if let Err(err) = self.outcomes.record(&record).await {
                tracing::error!(room_id, %err, "failed to record game outcome");
            }
            self.notify_participants(&snapshot);
        } else {
            drop(state);
        }

        self.publish_or_deliver(room_id, ServerFrame::GameState {
            state: snapshot,
        })
        .await;
        Ok(())
    }

    /// Explicitly leaves a room. A non-terminal room is cancelled; a
    /// terminal room just detaches the connection.
    pub async fn leave_room(
        &self,
        handle: &ConnectionHandle,
        room_id: u64,
    ) -> Result<GameSnapshot, GameError> {
        let room = self.room(room_id)?;
        let mut state = room.lock().await;
        if !state.is_participant(handle.user_id) {
            return Err(GameError::NotParticipant);
        }

        self.hub.leave(&room_key(room_id), &handle.conn_id);
        let cancelled = if state.status.is_terminal() {
            false
        } else {
            state.status = RoomStatus::Cancelled;
            state.current_turn = None;
            state.finished_at = Some(Instant::now());
            tracing::info!(room_id, user = %handle.user_id, "game room cancelled");
            true
        };

        let snapshot = state.snapshot();
        drop(state);
        if cancelled {
            self.open_rooms.fetch_sub(1, Ordering::AcqRel);
            self.notify_participants(&snapshot);
            self.publish_or_deliver(room_id, ServerFrame::GameState {
                state: snapshot.clone(),
            })
            .await;
        }
        Ok(snapshot)
    }

    /// Starts a fresh pending room for the same game once the previous
    /// one is over. The other participant is told on their user channel
    /// so their UI can offer the new room.
    pub async fn rematch(
        &self,
        handle: &ConnectionHandle,
        room_id: u64,
    ) -> Result<GameSnapshot, GameError> {
        let (game, other) = {
            let room = self.room(room_id)?;
            let state = room.lock().await;
            if !state.is_participant(handle.user_id) {
                return Err(GameError::NotParticipant);
            }
            if !state.status.is_terminal() {
                return Err(GameError::NotFinished);
            }
            (state.game, state.other_participant(handle.user_id))
        };

        let snapshot = self.create_room(handle, game)?;
        if let Some(other) = other {
            self.hub.broadcast(
                &user_channel(other),
                &ServerFrame::RoomUpdated {
                    state: snapshot.clone(),
                },
                None,
            );
        }
        Ok(snapshot)
    }

    /// In-room chat, participants only, kept in the bounded history and
    /// relayed to everyone attached.
    pub async fn room_message(
        &self,
        user_id: UserId,
        room_id: u64,
        text: String,
    ) -> Result<(), GameError> {
        let room = self.room(room_id)?;
        let mut state = room.lock().await;
        if !state.is_participant(user_id) {
            return Err(GameError::NotParticipant);
        }
        let sent_at = chrono::Utc::now().timestamp_millis();
        state.push_message(RoomChatMessage {
            user_id,
            text: text.clone(),
            sent_at,
        });
        drop(state);

        self.publish_or_deliver(room_id, ServerFrame::RoomMessage {
            room: RoomId::Game(room_id),
            user_id,
            text,
            sent_at,
        })
        .await;
        Ok(())
    }

    /// Handles a bus event on `game:room:*`: fan the frame out to the
    /// room's local connections.
    pub fn handle_event(&self, channel: &str, payload: &str) {
        let Some(room_id) = channel
            .strip_prefix("game:room:")
            .and_then(|id| id.parse::<u64>().ok())
        else {
            tracing::warn!(%channel, "unroutable game event");
            return;
        };
        match serde_json::from_str::<ServerFrame>(payload) {
            Ok(frame) => {
                self.hub.broadcast(&room_key(room_id), &frame, None);
            }
            Err(err) => {
                tracing::warn!(%channel, %err, "discarding undecodable game event");
            }
        }
    }

    pub async fn snapshot(&self, room_id: u64) -> Result<GameSnapshot, GameError> {
        let room = self.room(room_id)?;
        let state = room.lock().await;
        Ok(state.snapshot())
    }

    pub fn open_room_count(&self) -> usize {
        self.open_rooms.load(Ordering::Acquire)
    }

    /// Cancels pending rooms nobody ever joined past the age limit and
    /// evicts terminal rooms past the retention window, so abandoned
    /// rooms stop pinning capacity and memory.
    pub async fn reap_stale(&self, pending_max_age: Duration, retention: Duration) {
        let now = Instant::now();
        let rooms: Vec<(u64, Arc<Mutex<GameRoomState>>)> = {
            let map = self.rooms.read().expect("game rooms lock poisoned");
            map.iter().map(|(id, room)| (*id, Arc::clone(room))).collect()
        };

        let mut evict = Vec::new();
        for (room_id, room) in rooms {
            let mut state = room.lock().await;
            match state.status {
                RoomStatus::Pending
                    if now.duration_since(state.created_at) >= pending_max_age =>
                {
                    state.status = RoomStatus::Cancelled;
                    state.current_turn = None;
                    state.finished_at = Some(now);
                    let snapshot = state.snapshot();
                    drop(state);
                    self.open_rooms.fetch_sub(1, Ordering::AcqRel);
                    tracing::info!(room_id, "cancelled stale pending room");
                    self.notify_participants(&snapshot);
                    self.publish_or_deliver(room_id, ServerFrame::GameState {
                        state: snapshot,
                    })
                    .await;
                }
                RoomStatus::Finished | RoomStatus::Cancelled => {
                    if state
                        .finished_at
                        .is_none_or(|at| now.duration_since(at) >= retention)
                    {
                        evict.push(room_id);
                    }
                }
                _ => {}
            }
        }

        if !evict.is_empty() {
            let mut map = self.rooms.write().expect("game rooms lock poisoned");
            for room_id in &evict {
                map.remove(room_id);
            }
            drop(map);
            for room_id in evict {
                self.hub.drop_room(&room_key(room_id));
                tracing::debug!(room_id, "evicted terminal game room");
            }
        }
    }

    /// Runs [`reap_stale`](Self::reap_stale) on an interval until the
    /// shutdown signal flips.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        pending_max_age: Duration,
        retention: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let games = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => games.reap_stale(pending_max_age, retention).await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    fn room(&self, room_id: u64) -> Result<Arc<Mutex<GameRoomState>>, GameError> {
        self.rooms
            .read()
            .expect("game rooms lock poisoned")
            .get(&room_id)
            .cloned()
            .ok_or(GameError::RoomNotFound(room_id))
    }

    /// Completion notice to both participants' user channels, for UI
    /// outside the room view.
    fn notify_participants(&self, snapshot: &GameSnapshot) {
        let frame = ServerFrame::RoomUpdated {
            state: snapshot.clone(),
        };
        for user in [Some(snapshot.creator), snapshot.opponent]
            .into_iter()
            .flatten()
        {
            self.hub.broadcast(&user_channel(user), &frame, None);
        }
    }

    async fn publish_or_deliver(&self, room_id: u64, frame: ServerFrame) {
        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(room_id, %err, "unserializable frame");
                return;
            }
        };
        if let Err(err) = self.notifier.publish(&bus_channel(room_id), &payload).await {
            tracing::warn!(room_id, %err, "publish failed, delivering locally");
            self.hub.broadcast(&room_key(room_id), &frame, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::EventHandler;
    use serde_json::json;
    use tokio::sync::{mpsc, watch};

    struct Fixture {
        games: Arc<GameHub>,
        hub: Arc<Hub>,
        outcomes: Arc<MemoryOutcomeStore>,
        _shutdown: watch::Sender<bool>,
    }

    async fn fixture() -> Fixture {
        let hub = Arc::new(Hub::new());
        let notifier = Notifier::local();
        let outcomes = Arc::new(MemoryOutcomeStore::new());
        let games = Arc::new(GameHub::new(
            Arc::clone(&hub),
            Arc::clone(&notifier),
            Arc::clone(&outcomes) as Arc<dyn OutcomeStore>,
            4,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fanout = Arc::clone(&games);
        let handler: EventHandler = Arc::new(move |channel, payload| {
            let games = Arc::clone(&fanout);
            Box::pin(async move {
                games.handle_event(&channel, &payload);
            })
        });
        let _ = notifier.subscribe(vec!["game:room:*".into()], handler, shutdown_rx);
        tokio::task::yield_now().await;

        Fixture {
            games,
            hub,
            outcomes,
            _shutdown: shutdown_tx,
        }
    }

    fn connect(user: u64) -> (ConnectionHandle, mpsc::Receiver<ServerFrame>) {
        ConnectionHandle::new(UserId(user), 64)
    }

    fn mv(row: usize, col: usize) -> Value {
        json!({ "row": row, "col": col })
    }

    async fn expect_game_state(rx: &mut mpsc::Receiver<ServerFrame>) -> GameSnapshot {
        loop {
            match rx.recv().await.expect("connection channel closed") {
                ServerFrame::GameState { state } => return state,
                ServerFrame::RoomState { state } => return state,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn join_activates_pending_room_with_creator_to_move() {
        let f = fixture().await;
        let (creator, mut creator_rx) = connect(1);
        let (opponent, _opponent_rx) = connect(2);

        let created = f.games.create_room(&creator, GameType::TicTacToe).unwrap();
        assert_eq!(created.status, RoomStatus::Pending);
        assert!(created.current_turn.is_none());

        let joined = f.games.join_room(&opponent, 1).await.unwrap();
        assert_eq!(joined.status, RoomStatus::Active);
        assert_eq!(joined.current_turn, Some(UserId(1)));
        assert_eq!(joined.opponent, Some(UserId(2)));

        // The creator hears about the activation through the bus.
        let state = expect_game_state(&mut creator_rx).await;
        assert_eq!(state.status, RoomStatus::Active);
    }

    #[tokio::test]
    async fn third_player_cannot_join_an_active_room() {
        let f = fixture().await;
        let (creator, _rx1) = connect(1);
        let (opponent, _rx2) = connect(2);
        let (intruder, _rx3) = connect(3);

        f.games.create_room(&creator, GameType::TicTacToe).unwrap();
        f.games.join_room(&opponent, 1).await.unwrap();

        assert!(matches!(
            f.games.join_room(&intruder, 1).await,
            Err(GameError::RoomFull)
        ));
    }

    #[tokio::test]
    async fn out_of_turn_move_errors_without_any_broadcast() {
        let f = fixture().await;
        let (creator, mut creator_rx) = connect(1);
        let (opponent, _opponent_rx) = connect(2);
        f.games.create_room(&creator, GameType::TicTacToe).unwrap();
        f.games.join_room(&opponent, 1).await.unwrap();
        // Drain the activation frame.
        expect_game_state(&mut creator_rx).await;

        let err = f.games.make_move(UserId(2), 1, &mv(0, 0)).await.unwrap_err();
        assert!(matches!(err, GameError::OutOfTurn));

        tokio::task::yield_now().await;
        assert!(creator_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn moves_against_pending_or_unknown_rooms_are_rejected() {
        let f = fixture().await;
        let (creator, _rx) = connect(1);
        f.games.create_room(&creator, GameType::TicTacToe).unwrap();

        assert!(matches!(
            f.games.make_move(UserId(1), 1, &mv(0, 0)).await,
            Err(GameError::NotStarted)
        ));
        assert!(matches!(
            f.games.make_move(UserId(1), 404, &mv(0, 0)).await,
            Err(GameError::RoomNotFound(404))
        ));
    }

    #[tokio::test]
    async fn finished_game_records_one_outcome_and_rejects_further_moves() {
        let f = fixture().await;
        let (creator, mut creator_rx) = connect(1);
        let (opponent, _opponent_rx) = connect(2);
        f.games.create_room(&creator, GameType::TicTacToe).unwrap();
        f.games.join_room(&opponent, 1).await.unwrap();

        // x x x across the top row.
        let script = [
            (1, 0, 0),
            (2, 1, 0),
            (1, 0, 1),
            (2, 1, 1),
            (1, 0, 2),
        ];
        for (user, row, col) in script {
            f.games.make_move(UserId(user), 1, &mv(row, col)).await.unwrap();
        }

        let final_state = loop {
            let state = expect_game_state(&mut creator_rx).await;
            if state.status == RoomStatus::Finished {
                break state;
            }
        };
        assert_eq!(final_state.winner, Some(UserId(1)));
        assert!(!final_state.is_draw);

        let record = f.outcomes.recorded(1).expect("outcome recorded");
        assert_eq!(record.winner, Some(UserId(1)));
        assert_eq!(record.points, GameType::TicTacToe.winner_points());
        assert_eq!(f.outcomes.stats(UserId(1)).points, 10);
        assert_eq!(f.games.open_room_count(), 0);

        assert!(matches!(
            f.games.make_move(UserId(2), 1, &mv(2, 2)).await,
            Err(GameError::Terminal)
        ));
    }

    #[tokio::test]
    async fn socket_drop_leaves_the_room_resumable() {
        let f = fixture().await;
        let (creator, _creator_rx) = connect(1);
        let (opponent, _opponent_rx) = connect(2);
        f.games.create_room(&creator, GameType::TicTacToe).unwrap();
        f.games.join_room(&opponent, 1).await.unwrap();
        f.games.make_move(UserId(1), 1, &mv(0, 0)).await.unwrap();

        // Opponent's socket dies without a leave_room.
        f.hub.remove_connection(&opponent.conn_id);

        let snapshot = f.games.snapshot(1).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Active);
        assert_eq!(snapshot.current_turn, Some(UserId(2)));

        // Reconnect, re-attach, and play on.
        let (opponent2, _rx) = connect(2);
        let rejoined = f.games.join_room(&opponent2, 1).await.unwrap();
        assert_eq!(rejoined.status, RoomStatus::Active);
        f.games.make_move(UserId(2), 1, &mv(1, 1)).await.unwrap();
    }

    #[tokio::test]
    async fn explicit_leave_cancels_a_live_room() {
        let f = fixture().await;
        let (creator, _rx1) = connect(1);
        let (opponent, _rx2) = connect(2);
        f.games.create_room(&creator, GameType::Othello).unwrap();
        f.games.join_room(&opponent, 1).await.unwrap();

        let snapshot = f.games.leave_room(&opponent, 1).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Cancelled);
        assert_eq!(f.games.open_room_count(), 0);

        assert!(matches!(
            f.games.make_move(UserId(1), 1, &mv(2, 3)).await,
            Err(GameError::Terminal)
        ));
    }

    #[tokio::test]
    async fn room_capacity_is_enforced_at_creation() {
        let f = fixture().await;
        let (creator, _rx) = connect(1);
        for _ in 0..4 {
            f.games.create_room(&creator, GameType::TicTacToe).unwrap();
        }
        assert!(matches!(
            f.games.create_room(&creator, GameType::TicTacToe),
            Err(GameError::RoomCapacity)
        ));
        assert_eq!(f.games.open_room_count(), 4);

        // A failed creation reserves nothing; cancelling frees a slot.
        f.games.leave_room(&creator, 1).await.unwrap();
        assert_eq!(f.games.open_room_count(), 3);
        f.games.create_room(&creator, GameType::TicTacToe).unwrap();
    }

    #[tokio::test]
    async fn activating_joiner_gets_room_state_exactly_once() {
        let f = fixture().await;
        let (creator, _rx1) = connect(1);
        let (opponent, mut opponent_rx) = connect(2);
        f.games.create_room(&creator, GameType::TicTacToe).unwrap();
        f.games.join_room(&opponent, 1).await.unwrap();

        let state = expect_game_state(&mut opponent_rx).await;
        assert_eq!(state.status, RoomStatus::Active);
        tokio::task::yield_now().await;
        assert!(opponent_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_pending_rooms_are_cancelled_and_free_capacity() {
        let f = fixture().await;
        let (creator, _rx) = connect(1);
        for _ in 0..4 {
            f.games.create_room(&creator, GameType::TicTacToe).unwrap();
        }
        assert!(matches!(
            f.games.create_room(&creator, GameType::TicTacToe),
            Err(GameError::RoomCapacity)
        ));

        tokio::time::advance(Duration::from_secs(601)).await;
        f.games
            .reap_stale(Duration::from_secs(600), Duration::from_secs(300))
            .await;

        assert_eq!(f.games.open_room_count(), 0);
        assert_eq!(
            f.games.snapshot(1).await.unwrap().status,
            RoomStatus::Cancelled
        );
        f.games.create_room(&creator, GameType::TicTacToe).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_rooms_are_evicted_after_retention() {
        let f = fixture().await;
        let (creator, _rx1) = connect(1);
        let (opponent, _rx2) = connect(2);
        f.games.create_room(&creator, GameType::TicTacToe).unwrap();
        f.games.join_room(&opponent, 1).await.unwrap();
        f.games.leave_room(&opponent, 1).await.unwrap();

        // Inside the retention window the room stays queryable.
        f.games
            .reap_stale(Duration::from_secs(600), Duration::from_secs(300))
            .await;
        assert_eq!(
            f.games.snapshot(1).await.unwrap().status,
            RoomStatus::Cancelled
        );

        tokio::time::advance(Duration::from_secs(301)).await;
        f.games
            .reap_stale(Duration::from_secs(600), Duration::from_secs(300))
            .await;
        assert!(matches!(
            f.games.snapshot(1).await,
            Err(GameError::RoomNotFound(1))
        ));
    }

    #[tokio::test]
    async fn rematch_requires_a_finished_room_and_opens_a_fresh_one() {
        let f = fixture().await;
        let (creator, _rx1) = connect(1);
        let (opponent, mut opponent_rx) = connect(2);
        f.hub.join(&user_channel(UserId(2)), opponent.clone());
        f.games.create_room(&creator, GameType::TicTacToe).unwrap();
        f.games.join_room(&opponent, 1).await.unwrap();

        assert!(matches!(
            f.games.rematch(&creator, 1).await,
            Err(GameError::NotFinished)
        ));

        f.games.leave_room(&opponent, 1).await.unwrap();
        let fresh = f.games.rematch(&creator, 1).await.unwrap();
        assert_eq!(fresh.room, RoomId::Game(2));
        assert_eq!(fresh.status, RoomStatus::Pending);
        assert_eq!(fresh.creator, UserId(1));
        assert!(fresh.opponent.is_none());

        // The other participant is told on their user channel.
        loop {
            match opponent_rx.recv().await.unwrap() {
                ServerFrame::RoomUpdated { state } if state.room == RoomId::Game(2) => break,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn room_chat_is_replayed_to_late_attachers() {
        let f = fixture().await;
        let (creator, _rx1) = connect(1);
        f.games.create_room(&creator, GameType::TicTacToe).unwrap();
        f.games
            .room_message(UserId(1), 1, "gl hf".into())
            .await
            .unwrap();

        let (opponent, mut opponent_rx) = connect(2);
        f.games.join_room(&opponent, 1).await.unwrap();
        match opponent_rx.recv().await.unwrap() {
            ServerFrame::RoomMessage { user_id, text, .. } => {
                assert_eq!(user_id, UserId(1));
                assert_eq!(text, "gl hf");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn othello_forced_pass_keeps_the_turn_with_the_mover() {
        let f = fixture().await;
        let (creator, _rx1) = connect(1);
        let (opponent, _rx2) = connect(2);
        f.games.create_room(&creator, GameType::Othello).unwrap();
        f.games.join_room(&opponent, 1).await.unwrap();

        // Rig a position where black's capture on the left edge leaves
        // white with a lone disc at (0, 5) and no legal reply, while
        // black can still play (0, 4).
        {
            let room = f.games.room(1).unwrap();
            let mut state = room.lock().await;
            let mut grid: [[Option<Mark>; 8]; 8] = Default::default();
            grid[0][5] = Some(Mark::O);
            grid[0][6] = Some(Mark::X);
            grid[0][7] = Some(Mark::X);
            grid[5][0] = Some(Mark::O);
            grid[6][0] = Some(Mark::X);
            state.board = Board::Othello(grid);
        }

        f.games.make_move(UserId(1), 1, &mv(4, 0)).await.unwrap();
        let snapshot = f.games.snapshot(1).await.unwrap();
        // White passes, black keeps the turn.
        assert_eq!(snapshot.status, RoomStatus::Active);
        assert_eq!(snapshot.current_turn, Some(UserId(1)));
    }
}
