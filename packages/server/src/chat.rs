//! Conversation messaging over per-user delivery channels.
//!
//! Every connection registers under its user's delivery channel, so a
//! conversation broadcast is "resolve the member list, deliver to each
//! member's channel". All devices of all members get the frame, the
//! sender's other devices included; no connection ever gets it twice.
//!
//! Outbound chat events take the long way around: published to the
//! notifier, received back by this process's subscription, then fanned
//! out. That keeps delivery identical whether the recipients sit on
//! this process or a sibling. Only a failed publish falls back to
//! direct local delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use undertow_shared::{ServerFrame, UserId};
use undertow_shared::protocol::PresenceStatus;

use crate::connection::ConnectionHandle;
use crate::error::{ChatError, CollabError};
use crate::hub::Hub;
use crate::notifier::Notifier;

/// How long a typing indicator stays lit client-side.
pub const TYPING_EXPIRES_MS: u64 = 5_000;

const MEMBERSHIP_CACHE_TTL: Duration = Duration::from_secs(30);

pub fn user_channel(user_id: UserId) -> String {
    format!("user:{}", user_id.0)
}

fn conversation_channel(conversation_id: u64) -> String {
    format!("chat:conv:{conversation_id}")
}

fn typing_channel(conversation_id: u64) -> String {
    format!("typing:conv:{conversation_id}")
}

/// Who belongs to a conversation. Owned by the host application; the
/// core only asks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    async fn conversation_members(&self, conversation_id: u64)
    -> Result<Vec<UserId>, CollabError>;
}

pub struct ChatHub {
    hub: Arc<Hub>,
    membership: Arc<dyn MembershipProvider>,
    notifier: Arc<Notifier>,
    member_cache: Mutex<HashMap<u64, (Vec<UserId>, Instant)>>,
}

impl ChatHub {
    pub fn new(
        hub: Arc<Hub>,
        membership: Arc<dyn MembershipProvider>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            hub,
            membership,
            notifier,
            member_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a connection under its user's delivery channel.
    /// Teardown goes through [`Hub::remove_connection`].
    pub fn register(&self, handle: ConnectionHandle) {
        self.hub.join(&user_channel(handle.user_id), handle);
    }

    /// Relays a chat message to every member of the conversation.
    /// Rejected before publication when the sender is not a member.
    pub async fn send_message(
        &self,
        sender: UserId,
        conversation_id: u64,
        content: String,
    ) -> Result<(), ChatError> {
        self.ensure_member(conversation_id, sender).await?;
        let frame = ServerFrame::Message {
            conversation_id,
            user_id: sender,
            content,
            sent_at: chrono::Utc::now().timestamp_millis(),
        };
        self.publish_or_deliver(&conversation_channel(conversation_id), conversation_id, frame)
            .await;
        Ok(())
    }

    /// Ephemeral typing indicator; broadcast like a message, never
    /// stored.
    pub async fn typing(
        &self,
        sender: UserId,
        conversation_id: u64,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        self.ensure_member(conversation_id, sender).await?;
        let frame = ServerFrame::Typing {
            conversation_id,
            user_id: sender,
            is_typing,
            expires_in_ms: TYPING_EXPIRES_MS,
        };
        self.publish_or_deliver(&typing_channel(conversation_id), conversation_id, frame)
            .await;
        Ok(())
    }

    /// Ephemeral read receipt.
    pub async fn read(&self, sender: UserId, conversation_id: u64) -> Result<(), ChatError> {
        self.ensure_member(conversation_id, sender).await?;
        let frame = ServerFrame::Read {
            conversation_id,
            user_id: sender,
        };
        self.publish_or_deliver(&typing_channel(conversation_id), conversation_id, frame)
            .await;
        Ok(())
    }

    /// Handles a bus event on `chat:conv:*` or `typing:conv:*`.
    pub async fn handle_event(&self, channel: &str, payload: &str) {
        let conversation_id = match channel
            .strip_prefix("chat:conv:")
            .or_else(|| channel.strip_prefix("typing:conv:"))
            .and_then(|id| id.parse::<u64>().ok())
        {
            Some(id) => id,
            None => {
                tracing::warn!(%channel, "unroutable chat event");
                return;
            }
        };
        let frame: ServerFrame = match serde_json::from_str(payload) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%channel, %err, "discarding undecodable chat event");
                return;
            }
        };
        self.fan_out(conversation_id, &frame).await;
    }

    /// Delivers a frame to every connection of every conversation
    /// member on this process.
    async fn fan_out(&self, conversation_id: u64, frame: &ServerFrame) {
        let members = match self.members(conversation_id).await {
            Ok(members) => members,
            Err(err) => {
                tracing::warn!(conversation_id, %err, "membership lookup failed, dropping event");
                return;
            }
        };
        for member in members {
            self.hub.broadcast(&user_channel(member), frame, None);
        }
    }

    async fn publish_or_deliver(&self, channel: &str, conversation_id: u64, frame: ServerFrame) {
        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(%channel, %err, "unserializable frame");
                return;
            }
        };
        if let Err(err) = self.notifier.publish(channel, &payload).await {
            // Degraded mode: sibling processes miss the event, local
            // recipients still get it.
            tracing::warn!(%channel, %err, "publish failed, delivering locally");
            self.fan_out(conversation_id, &frame).await;
        }
    }

    /// Pushes a frame to every connection of one user on this process.
    pub fn push_to_user(&self, user_id: UserId, frame: &ServerFrame) -> usize {
        self.hub.broadcast(&user_channel(user_id), frame, None)
    }

    /// Presence transition fan-out to everyone connected here.
    pub fn broadcast_user_status(&self, user_id: UserId, status: PresenceStatus) {
        let frame = ServerFrame::UserStatus { user_id, status };
        for handle in self.hub.all_connections() {
            handle.send(frame.clone());
        }
    }

    async fn ensure_member(&self, conversation_id: u64, user_id: UserId) -> Result<(), ChatError> {
        if self.members(conversation_id).await?.contains(&user_id) {
            Ok(())
        } else {
            Err(ChatError::NotMember(conversation_id))
        }
    }

    async fn members(&self, conversation_id: u64) -> Result<Vec<UserId>, CollabError> {
        {
            let cache = self.member_cache.lock().await;
            if let Some((members, fetched_at)) = cache.get(&conversation_id) {
                if fetched_at.elapsed() < MEMBERSHIP_CACHE_TTL {
                    return Ok(members.clone());
                }
            }
        }
        let members = self
            .membership
            .conversation_members(conversation_id)
            .await?;
        let mut cache = self.member_cache.lock().await;
        cache.insert(conversation_id, (members.clone(), Instant::now()));
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::EventHandler;
    use tokio::sync::{mpsc, watch};

    fn wired_chat(membership: MockMembershipProvider) -> (Arc<ChatHub>, watch::Sender<bool>) {
        let notifier = Notifier::local();
        let chat = Arc::new(ChatHub::new(
            Arc::new(Hub::new()),
            Arc::new(membership),
            Arc::clone(&notifier),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fanout = Arc::clone(&chat);
        let handler: EventHandler = Arc::new(move |channel, payload| {
            let chat = Arc::clone(&fanout);
            Box::pin(async move {
                chat.handle_event(&channel, &payload).await;
            })
        });
        let _ = notifier.subscribe(
            vec!["chat:conv:*".into(), "typing:conv:*".into()],
            handler,
            shutdown_rx,
        );
        (chat, shutdown_tx)
    }

    fn connect(chat: &ChatHub, user: u64) -> (ConnectionHandle, mpsc::Receiver<ServerFrame>) {
        let (handle, rx) = ConnectionHandle::new(UserId(user), 16);
        chat.register(handle.clone());
        (handle, rx)
    }

    #[tokio::test]
    async fn message_reaches_every_device_of_every_member_once() {
        let mut membership = MockMembershipProvider::new();
        membership
            .expect_conversation_members()
            .returning(|_| Ok(vec![UserId(1), UserId(2)]));
        let (chat, _shutdown) = wired_chat(membership);

        let (_v1, mut v1_rx) = connect(&chat, 1);
        let (_v2, mut v2_rx) = connect(&chat, 1);
        let (_w, mut w_rx) = connect(&chat, 2);
        tokio::task::yield_now().await;

        chat.send_message(UserId(1), 5, "hello".into()).await.unwrap();

        for rx in [&mut v1_rx, &mut v2_rx, &mut w_rx] {
            match rx.recv().await.unwrap() {
                ServerFrame::Message {
                    conversation_id,
                    user_id,
                    content,
                    ..
                } => {
                    assert_eq!(conversation_id, 5);
                    assert_eq!(user_id, UserId(1));
                    assert_eq!(content, "hello");
                }
                other => panic!("unexpected frame: {other:?}"),
            }
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn non_member_send_is_rejected_and_not_delivered() {
        let mut membership = MockMembershipProvider::new();
        membership
            .expect_conversation_members()
            .returning(|_| Ok(vec![UserId(1)]));
        let (chat, _shutdown) = wired_chat(membership);

        let (_member, mut member_rx) = connect(&chat, 1);
        tokio::task::yield_now().await;

        let err = chat
            .send_message(UserId(9), 5, "sneak".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotMember(5)));

        tokio::task::yield_now().await;
        assert!(member_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_carries_expiry_and_is_not_persisted_anywhere() {
        let mut membership = MockMembershipProvider::new();
        membership
            .expect_conversation_members()
            .returning(|_| Ok(vec![UserId(1), UserId(2)]));
        let (chat, _shutdown) = wired_chat(membership);

        let (_w, mut w_rx) = connect(&chat, 2);
        tokio::task::yield_now().await;

        chat.typing(UserId(1), 8, true).await.unwrap();
        match w_rx.recv().await.unwrap() {
            ServerFrame::Typing {
                user_id,
                is_typing,
                expires_in_ms,
                ..
            } => {
                assert_eq!(user_id, UserId(1));
                assert!(is_typing);
                assert_eq!(expires_in_ms, TYPING_EXPIRES_MS);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn membership_lookups_are_cached() {
        let mut membership = MockMembershipProvider::new();
        membership
            .expect_conversation_members()
            .times(1)
            .returning(|_| Ok(vec![UserId(1), UserId(2)]));
        let (chat, _shutdown) = wired_chat(membership);

        let (_w, mut w_rx) = connect(&chat, 2);
        tokio::task::yield_now().await;

        chat.send_message(UserId(1), 3, "a".into()).await.unwrap();
        w_rx.recv().await.unwrap();
        chat.send_message(UserId(1), 3, "b".into()).await.unwrap();
        w_rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn user_status_reaches_all_connections() {
        let membership = MockMembershipProvider::new();
        let (chat, _shutdown) = wired_chat(membership);

        let (_a, mut a_rx) = connect(&chat, 1);
        let (_b, mut b_rx) = connect(&chat, 2);

        chat.broadcast_user_status(UserId(7), PresenceStatus::Offline);
        for rx in [&mut a_rx, &mut b_rx] {
            assert_eq!(
                rx.recv().await.unwrap(),
                ServerFrame::UserStatus {
                    user_id: UserId(7),
                    status: PresenceStatus::Offline,
                }
            );
        }
    }
}
