//! Realtime messaging, presence, and game-room core.
//!
//! The building blocks (`Hub`, `ChatHub`, `GameHub`, `PresenceManager`,
//! `TicketAuthenticator`, `Notifier`) compose into a [`RealtimeCore`],
//! and [`ui::Server`] hosts one core over axum. Host applications embed
//! the core and supply the collaborators it does not own: conversation
//! membership and game outcome persistence.

pub mod chat;
pub mod config;
pub mod connection;
pub mod core;
pub mod error;
pub mod game;
pub mod hub;
pub mod logger;
pub mod notifier;
pub mod presence;
pub mod store;
pub mod ticket;
pub mod ui;

pub use crate::chat::{ChatHub, MembershipProvider};
pub use crate::config::{Config, StoreConfig};
pub use crate::connection::ConnectionHandle;
pub use crate::core::RealtimeCore;
pub use crate::game::{GameHub, GameOutcomeRecord, MemoryOutcomeStore, OutcomeStore};
pub use crate::hub::Hub;
pub use crate::notifier::Notifier;
pub use crate::presence::PresenceManager;
pub use crate::store::{MemoryStore, RedisStore, SharedStore};
pub use crate::ticket::TicketAuthenticator;
