//! Online/offline tracking with a grace period.
//!
//! A user is online while they have at least one registered connection.
//! When the last connection drops, the offline transition is deferred by
//! a grace timer so a page reload or network blip never produces an
//! offline/online flap. Local state is mirrored into the shared store
//! (membership set plus a per-user last-seen key with a TTL) so sibling
//! processes and HTTP-side collaborators can answer "who is online".
//!
//! Store writes are best-effort: a store outage degrades cross-process
//! visibility but never blocks or disconnects local traffic.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use undertow_shared::UserId;
use undertow_shared::protocol::PresenceStatus;

use crate::error::ConnectionLimitError;
use crate::store::SharedStore;

const ONLINE_USERS_KEY: &str = "ws:online_users";

fn last_seen_key(user_id: UserId) -> String {
    format!("ws:last_seen:{}", user_id.0)
}

type TransitionListener = Box<dyn Fn(UserId, PresenceStatus) + Send + Sync>;

#[derive(Default)]
struct State {
    /// Live connection count per user.
    counts: HashMap<u64, usize>,
    /// Users currently considered online (grace timer not yet fired).
    online: HashSet<u64>,
    /// Pending offline timers, aborted when the user reconnects.
    grace_timers: HashMap<u64, JoinHandle<()>>,
}

pub struct PresenceManager {
    store: Arc<dyn SharedStore>,
    grace: Duration,
    ttl: Duration,
    max_connections_per_user: usize,
    state: Mutex<State>,
    listeners: Mutex<Vec<TransitionListener>>,
}

impl PresenceManager {
    pub fn new(
        store: Arc<dyn SharedStore>,
        grace: Duration,
        ttl: Duration,
        max_connections_per_user: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            grace,
            ttl,
            max_connections_per_user,
            state: Mutex::new(State::default()),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Registers a callback fired on every online/offline transition.
    /// Listeners run outside the presence lock.
    pub fn on_transition(
        &self,
        listener: impl Fn(UserId, PresenceStatus) + Send + Sync + 'static,
    ) {
        self.listeners
            .lock()
            .expect("presence lock poisoned")
            .push(Box::new(listener));
    }

    /// Accounts for a new connection. Rejects when the user is already
    /// at their connection limit; a rejected registration changes no
    /// state. A reconnect within the grace period cancels the pending
    /// offline transition, so no flap is observed.
    pub fn register(self: &Arc<Self>, user_id: UserId) -> Result<(), ConnectionLimitError> {
        let came_online = {
            let mut state = self.state.lock().expect("presence lock poisoned");
            let count = state.counts.get(&user_id.0).copied().unwrap_or(0);
            if count >= self.max_connections_per_user {
                return Err(ConnectionLimitError {
                    user_id,
                    limit: self.max_connections_per_user,
                });
            }
            state.counts.insert(user_id.0, count + 1);
            if let Some(timer) = state.grace_timers.remove(&user_id.0) {
                timer.abort();
            }
            state.online.insert(user_id.0)
        };

        if came_online {
            self.notify(user_id, PresenceStatus::Online);
        }
        self.spawn_touch(user_id);
        Ok(())
    }

    /// Accounts for a closed connection. The last connection arms the
    /// grace timer instead of going offline immediately.
    pub fn unregister(self: &Arc<Self>, user_id: UserId) {
        let mut state = self.state.lock().expect("presence lock poisoned");
        let count = match state.counts.get(&user_id.0).copied() {
            Some(n) if n > 0 => n - 1,
            _ => return,
        };
        if count > 0 {
            state.counts.insert(user_id.0, count);
            return;
        }
        state.counts.remove(&user_id.0);

        let manager = Arc::clone(self);
        // The grace deadline counts from the disconnect itself, not from
        // whenever the timer task first runs.
        let deadline = tokio::time::Instant::now() + self.grace;
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            manager.declare_offline(user_id);
        });
        if let Some(previous) = state.grace_timers.insert(user_id.0, timer) {
            previous.abort();
        }
    }

    fn declare_offline(self: &Arc<Self>, user_id: UserId) {
        let went_offline = {
            let mut state = self.state.lock().expect("presence lock poisoned");
            state.grace_timers.remove(&user_id.0);
            if state.counts.contains_key(&user_id.0) {
                return;
            }
            state.online.remove(&user_id.0)
        };
        if !went_offline {
            return;
        }

        self.notify(user_id, PresenceStatus::Offline);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store
                .set_remove(ONLINE_USERS_KEY, &user_id.0.to_string())
                .await
            {
                tracing::warn!(user_id = %user_id, %err, "presence offline mirror failed");
            }
            // The last-seen key is left to expire on its own TTL.
        });
    }

    /// Refreshes the user's mirrored presence. Called on registration
    /// and on every heartbeat pong.
    pub async fn touch(&self, user_id: UserId) {
        let member = user_id.0.to_string();
        if let Err(err) = self.store.set_add(ONLINE_USERS_KEY, &member).await {
            tracing::warn!(user_id = %user_id, %err, "presence set mirror failed");
            return;
        }
        if let Err(err) = self
            .store
            .set_with_ttl(&last_seen_key(user_id), &member, self.ttl)
            .await
        {
            tracing::warn!(user_id = %user_id, %err, "presence last-seen mirror failed");
        }
    }

    fn spawn_touch(self: &Arc<Self>, user_id: UserId) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.touch(user_id).await;
        });
    }

    /// Local view first; falls back to the shared store so users served
    /// by a sibling process still report online.
    pub async fn is_online(&self, user_id: UserId) -> bool {
        if self.is_online_local(user_id) {
            return true;
        }
        self.store
            .exists(&last_seen_key(user_id))
            .await
            .unwrap_or(false)
    }

    pub fn is_online_local(&self, user_id: UserId) -> bool {
        self.state
            .lock()
            .expect("presence lock poisoned")
            .online
            .contains(&user_id.0)
    }

    /// Every user currently online across all processes, per the shared
    /// store's membership set.
    pub async fn online_user_ids(&self) -> Vec<UserId> {
        let members = match self.store.set_members(ONLINE_USERS_KEY).await {
            Ok(members) => members,
            Err(err) => {
                tracing::warn!(%err, "online set read failed, using local view");
                let state = self.state.lock().expect("presence lock poisoned");
                return state.online.iter().map(|id| UserId(*id)).collect();
            }
        };
        members
            .iter()
            .filter_map(|m| m.parse().ok().map(UserId))
            .collect()
    }

    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.state
            .lock()
            .expect("presence lock poisoned")
            .counts
            .get(&user_id.0)
            .copied()
            .unwrap_or(0)
    }

    /// Sweeps the shared membership set, evicting users whose last-seen
    /// key has expired (crashed process, dead socket never unregistered).
    pub async fn reap_stale(&self) {
        let members = match self.store.set_members(ONLINE_USERS_KEY).await {
            Ok(members) => members,
            Err(err) => {
                tracing::warn!(%err, "presence reaper sweep skipped");
                return;
            }
        };
        for member in members {
            let Ok(id) = member.parse::<u64>() else {
                let _ = self.store.set_remove(ONLINE_USERS_KEY, &member).await;
                continue;
            };
            // A user live on this process gets their key refreshed
            // instead of being evicted.
            if self.is_online_local(UserId(id)) {
                self.touch(UserId(id)).await;
                continue;
            }
            match self.store.exists(&last_seen_key(UserId(id))).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(user_id = id, "reaping stale presence entry");
                    let _ = self.store.set_remove(ONLINE_USERS_KEY, &member).await;
                }
                Err(err) => {
                    tracing::warn!(user_id = id, %err, "presence reaper check failed");
                }
            }
        }
    }

    /// Runs [`reap_stale`](Self::reap_stale) on an interval until the
    /// shutdown signal flips.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.reap_stale().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    fn notify(&self, user_id: UserId, status: PresenceStatus) {
        let listeners = self.listeners.lock().expect("presence lock poisoned");
        for listener in listeners.iter() {
            listener(user_id, status);
        }
    }
}
