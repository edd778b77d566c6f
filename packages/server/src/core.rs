//! Composition root wiring the realtime components together.
//!
//! One `RealtimeCore` per process: it owns the hubs, presence, tickets
//! and the notifier subscription, and exposes the collaborator API the
//! host application calls from its HTTP side (`push_to_user`,
//! `push_to_room`, ticket issuance).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use undertow_shared::{RoomId, ServerFrame, UserId};

use crate::chat::{ChatHub, MembershipProvider};
use crate::config::Config;
use crate::connection::ConnectionHandle;
use crate::error::{ConnectionLimitError, StoreError};
use crate::game::{GameHub, OutcomeStore};
use crate::hub::Hub;
use crate::notifier::{EventHandler, Notifier};
use crate::presence::PresenceManager;
use crate::store::SharedStore;
use crate::ticket::TicketAuthenticator;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct RealtimeCore {
    pub config: Config,
    pub hub: Arc<Hub>,
    pub presence: Arc<PresenceManager>,
    pub chat: Arc<ChatHub>,
    pub games: Arc<GameHub>,
    pub notifier: Arc<Notifier>,
    pub tickets: TicketAuthenticator,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RealtimeCore {
    pub fn new(
        config: Config,
        store: Arc<dyn SharedStore>,
        notifier: Arc<Notifier>,
        membership: Arc<dyn MembershipProvider>,
        outcomes: Arc<dyn OutcomeStore>,
    ) -> Arc<Self> {
        let hub = Arc::new(Hub::new());
        let presence = PresenceManager::new(
            Arc::clone(&store),
            config.presence_grace,
            config.presence_ttl,
            config.max_connections_per_user,
        );
        let chat = Arc::new(ChatHub::new(
            Arc::clone(&hub),
            membership,
            Arc::clone(&notifier),
        ));
        let games = Arc::new(GameHub::new(
            Arc::clone(&hub),
            Arc::clone(&notifier),
            outcomes,
            config.max_open_game_rooms,
        ));
        let tickets = TicketAuthenticator::new(
            Arc::clone(&store),
            config.ticket_ttl,
            config.consumed_marker_ttl,
        );
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            config,
            hub,
            presence,
            chat,
            games,
            notifier,
            tickets,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Wires the presence listener, the background sweeps, and the bus
    /// subscription. Call once before serving.
    pub async fn start(self: &Arc<Self>) {
        let chat = Arc::clone(&self.chat);
        self.presence.on_transition(move |user_id, status| {
            chat.broadcast_user_status(user_id, status);
        });

        let reaper = self.presence.spawn_reaper(
            self.config.reaper_interval,
            self.shutdown_tx.subscribe(),
        );
        let sweeper = self.games.spawn_sweeper(
            self.config.reaper_interval,
            self.config.pending_room_max_age,
            self.config.finished_room_retention,
            self.shutdown_tx.subscribe(),
        );

        let router = Arc::clone(self);
        let handler: EventHandler = Arc::new(move |channel, payload| {
            let core = Arc::clone(&router);
            Box::pin(async move {
                core.route_event(&channel, &payload).await;
            })
        });
        let subscription = self.notifier.subscribe(
            vec![
                "chat:conv:*".into(),
                "typing:conv:*".into(),
                "game:room:*".into(),
                "notifications:user:*".into(),
            ],
            handler,
            self.shutdown_tx.subscribe(),
        );

        let mut tasks = self.tasks.lock().await;
        tasks.push(reaper);
        tasks.push(sweeper);
        tasks.push(subscription);
    }

    async fn route_event(&self, channel: &str, payload: &str) {
        if channel.starts_with("chat:conv:") || channel.starts_with("typing:conv:") {
            self.chat.handle_event(channel, payload).await;
        } else if channel.starts_with("game:room:") {
            self.games.handle_event(channel, payload);
        } else if let Some(user_id) = channel
            .strip_prefix("notifications:user:")
            .and_then(|id| id.parse::<u64>().ok())
        {
            match serde_json::from_str::<Value>(payload) {
                Ok(event) => {
                    self.chat
                        .push_to_user(UserId(user_id), &ServerFrame::Notification { event });
                }
                Err(err) => {
                    tracing::warn!(%channel, %err, "discarding undecodable notification");
                }
            }
        } else {
            tracing::warn!(%channel, "unroutable bus event");
        }
    }

    /// Admits one socket: presence accounting first, then the delivery
    /// channel registration. The returned receiver feeds the socket's
    /// write pump.
    pub fn register_connection(
        self: &Arc<Self>,
        user_id: UserId,
    ) -> Result<(ConnectionHandle, mpsc::Receiver<ServerFrame>), ConnectionLimitError> {
        self.presence.register(user_id)?;
        let (handle, rx) = ConnectionHandle::new(user_id, self.config.outbound_queue_size);
        self.chat.register(handle.clone());
        Ok((handle, rx))
    }

    /// Tears one socket down. Safe to call from multiple paths; the
    /// close latch makes sure accounting runs once. Game rooms are
    /// deliberately left alone so the player can resume.
    pub fn cleanup_connection(self: &Arc<Self>, handle: &ConnectionHandle) {
        if !handle.close("socket teardown") {
            return;
        }
        self.hub.remove_connection(&handle.conn_id);
        self.presence.unregister(handle.user_id);
    }

    /// Collaborator push: deliver an arbitrary event to every device of
    /// one user, across all processes.
    pub async fn push_to_user(&self, user_id: UserId, event: Value) -> Result<(), StoreError> {
        let channel = format!("notifications:user:{}", user_id.0);
        let payload = serde_json::to_string(&event)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        if let Err(err) = self.notifier.publish(&channel, &payload).await {
            tracing::warn!(%channel, %err, "publish failed, delivering locally");
            self.chat
                .push_to_user(user_id, &ServerFrame::Notification { event });
            return Err(err);
        }
        Ok(())
    }

    /// Collaborator push: deliver a frame to a room's channel.
    pub async fn push_to_room(&self, room: &RoomId, frame: &ServerFrame) -> Result<(), StoreError> {
        let channel = match room {
            RoomId::Conversation(id) => format!("chat:conv:{id}"),
            RoomId::Game(id) => format!("game:room:{id}"),
        };
        let payload = serde_json::to_string(frame)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        self.notifier.publish(&channel, &payload).await
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Announces shutdown to every connection and waits for them to
    /// drain, up to the configured timeout. Returns whether the drain
    /// completed in time.
    pub async fn shutdown(&self) -> bool {
        let _ = self.shutdown_tx.send(true);

        let connections = self.hub.all_connections();
        tracing::info!(count = connections.len(), "shutting down, notifying connections");
        for handle in &connections {
            handle.send(ServerFrame::Shutdown {
                message: "server shutting down".to_string(),
            });
        }

        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            loop {
                if self.hub.all_connections().is_empty() {
                    return;
                }
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            let remaining = self.hub.all_connections();
            tracing::warn!(count = remaining.len(), "drain timeout, forcing connections closed");
            for handle in remaining {
                handle.close("drain timeout");
            }
        }

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        drained
    }
}
