//! Identity newtypes for users, connections and rooms.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A validated user identity, supplied by the authentication collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one physical connection. A user may hold several at once
/// (multiple tabs or devices).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A logical channel connections join and leave independently of the
/// socket lifecycle: a chat conversation or a game match.
///
/// Serialized on the wire as an opaque string, `"conv:<id>"` or
/// `"game:<id>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    Conversation(u64),
    Game(u64),
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Conversation(id) => write!(f, "conv:{id}"),
            RoomId::Game(id) => write!(f, "game:{id}"),
        }
    }
}

/// Error returned when a room id string does not parse.
#[derive(Debug, thiserror::Error)]
#[error("invalid room id: {0:?}")]
pub struct ParseRoomIdError(String);

impl FromStr for RoomId {
    type Err = ParseRoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRoomIdError(s.to_string());
        let (kind, raw) = s.split_once(':').ok_or_else(err)?;
        let id: u64 = raw.parse().map_err(|_| err())?;
        match kind {
            "conv" => Ok(RoomId::Conversation(id)),
            "game" => Ok(RoomId::Game(id)),
            _ => Err(err()),
        }
    }
}

impl Serialize for RoomId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
