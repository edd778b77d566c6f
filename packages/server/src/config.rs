//! Environment-style configuration for the realtime core.
//!
//! Every tunable has a default; only the shared-store address is
//! required, and only when the store mode is not explicitly `memory`.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Where presence, tickets and the cross-process bus live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// Redis, shared by every server process behind the load balancer.
    Redis { url: String },
    /// In-process only. Presence and tickets work for a single process;
    /// cross-process fan-out degrades to local delivery.
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    /// Max simultaneous connections per user.
    pub max_connections_per_user: usize,
    /// Max concurrently open (non-terminal) game rooms.
    pub max_open_game_rooms: usize,
    /// Outbound frame queue depth per connection.
    pub outbound_queue_size: usize,
    /// Server ping period. The read deadline is twice this.
    pub heartbeat_interval: Duration,
    /// Delay before a user with zero connections is declared offline.
    pub presence_grace: Duration,
    /// TTL on the mirrored last-seen key in the shared store.
    pub presence_ttl: Duration,
    /// How often the reaper sweeps stale presence entries.
    pub reaper_interval: Duration,
    /// Lifetime of an unconsumed connection ticket.
    pub ticket_ttl: Duration,
    /// How long a consumed ticket keeps validating for retried
    /// upgrade handshakes.
    pub consumed_marker_ttl: Duration,
    /// How long shutdown waits for connections to drain.
    pub drain_timeout: Duration,
    /// Age at which a still-pending game room is auto-cancelled.
    pub pending_room_max_age: Duration,
    /// How long a finished or cancelled game room stays queryable
    /// before it is evicted.
    pub finished_room_retention: Duration,
}

impl Config {
    /// Reads `UNDERTOW_*` environment variables, failing fast on a
    /// missing store address or unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let store = match env::var("UNDERTOW_STORE").ok().as_deref() {
            Some("memory") => StoreConfig::Memory,
            _ => {
                let url = env::var("UNDERTOW_STORE_URL")
                    .map_err(|_| ConfigError::Missing("UNDERTOW_STORE_URL"))?;
                StoreConfig::Redis { url }
            }
        };

        Ok(Self {
            store,
            max_connections_per_user: env_usize("UNDERTOW_MAX_CONNECTIONS_PER_USER", 8)?,
            max_open_game_rooms: env_usize("UNDERTOW_MAX_OPEN_GAME_ROOMS", 256)?,
            outbound_queue_size: env_usize("UNDERTOW_OUTBOUND_QUEUE_SIZE", 256)?,
            heartbeat_interval: env_duration_secs("UNDERTOW_HEARTBEAT_INTERVAL_SECS", 30)?,
            presence_grace: env_duration_secs("UNDERTOW_PRESENCE_GRACE_SECS", 2)?,
            presence_ttl: env_duration_secs("UNDERTOW_PRESENCE_TTL_SECS", 25)?,
            reaper_interval: env_duration_secs("UNDERTOW_REAPER_INTERVAL_SECS", 3)?,
            ticket_ttl: env_duration_secs("UNDERTOW_TICKET_TTL_SECS", 30)?,
            consumed_marker_ttl: env_duration_secs("UNDERTOW_CONSUMED_MARKER_TTL_SECS", 10)?,
            drain_timeout: env_duration_secs("UNDERTOW_DRAIN_TIMEOUT_SECS", 10)?,
            pending_room_max_age: env_duration_secs("UNDERTOW_PENDING_ROOM_MAX_AGE_SECS", 600)?,
            finished_room_retention: env_duration_secs(
                "UNDERTOW_FINISHED_ROOM_RETENTION_SECS",
                300,
            )?,
        })
    }

    /// Read deadline on a connection: twice the heartbeat interval, so
    /// a single lost ping does not kill the socket.
    pub fn read_deadline(&self) -> Duration {
        self.heartbeat_interval * 2
    }

    /// Defaults with an in-memory store; used by tests and embedders.
    pub fn for_memory_store() -> Self {
        Self {
            store: StoreConfig::Memory,
            max_connections_per_user: 8,
            max_open_game_rooms: 256,
            outbound_queue_size: 256,
            heartbeat_interval: Duration::from_secs(30),
            presence_grace: Duration::from_secs(2),
            presence_ttl: Duration::from_secs(25),
            reaper_interval: Duration::from_secs(3),
            ticket_ttl: Duration::from_secs(30),
            consumed_marker_ttl: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(10),
            pending_room_max_age: Duration::from_secs(600),
            finished_room_retention: Duration::from_secs(300),
        }
    }
}

fn env_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

fn env_duration_secs(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(Duration::from_secs(default)),
        Ok(raw) => raw
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}
