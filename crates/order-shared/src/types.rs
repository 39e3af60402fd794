use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{ID_EPOCH_MILLIS, ID_TIMESTAMP_SHIFT, SELF_USER_ID};
use crate::error::DecodeError;

// Entity identity = 64-bit id whose high bits are a creation timestamp
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Addresses the logged-in user in fetch requests.
    pub const SELF_USER: EntityId = EntityId(SELF_USER_ID);

    /// Milliseconds since the Unix epoch at which this id was minted.
    pub fn timestamp_millis(&self) -> i64 {
        (self.0 >> ID_TIMESTAMP_SHIFT) as i64 + ID_EPOCH_MILLIS
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_millis()).single()
    }

    /// Milliseconds between this id's creation and `later`'s (negative if `later` is older).
    pub fn millis_until(&self, later: EntityId) -> i64 {
        later.timestamp_millis() - self.timestamp_millis()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId(pub u64);

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle binding an outgoing request to the callback that awaits its response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationToken(pub u64);

impl std::fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Group,
    Channel,
    Role,
    Message,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Channel => "channel",
            Self::Role => "role",
            Self::Message => "message",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "group" => Ok(Self::Group),
            "channel" => Ok(Self::Channel),
            "role" => Ok(Self::Role),
            "message" => Ok(Self::Message),
            other => Err(DecodeError::UnknownEntityKind(other.to_string())),
        }
    }
}

/// Collection fields that can be fetched one window at a time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PageField {
    /// `channel.messages`
    Messages,
    /// `role.members`
    Members,
}

impl PageField {
    /// Field number used by the server's entity schema.
    pub fn wire_id(&self) -> u8 {
        match self {
            Self::Messages => 4,
            Self::Members => 6,
        }
    }

    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Messages => crate::entity::fields::MESSAGES,
            Self::Members => crate::entity::fields::MEMBERS,
        }
    }

    /// Kind of entity that owns the collection.
    pub fn owner(&self) -> EntityKind {
        match self {
            Self::Messages => EntityKind::Channel,
            Self::Members => EntityKind::Role,
        }
    }

    /// Kind of entity the collection's ids refer to.
    pub fn item_kind(&self) -> EntityKind {
        match self {
            Self::Messages => EntityKind::Message,
            Self::Members => EntityKind::User,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PageDirection {
    /// Items older than the anchor.
    Older,
    /// Items newer than the anchor.
    Newer,
}
