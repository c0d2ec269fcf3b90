//! Channel identifiers and event ids.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Platform-assigned id of a content event within its channel.
///
/// Ids are positive; `0` never names a real event.
pub type EventId = u64;

/// Sentinel cursor value meaning "nothing forwarded yet".
pub const UNSET_EVENT_ID: EventId = 0;

/// An origin stream events are relayed from.
pub type SourceChannel = ChannelRef;

/// The single sink all events are relayed to.
pub type TargetChannel = ChannelRef;

/// Opaque reference to a channel: either its numeric id or its public handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelRef {
    Id(i64),
    /// Lowercased, without the leading `@`.
    Handle(String),
}

impl ChannelRef {
    /// Parse a configured channel reference.
    ///
    /// Anything that parses as a signed integer (`-1001234`, `42`) is a numeric
    /// id; everything else is treated as a handle.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if let Ok(id) = trimmed.parse::<i64>() {
            return Ok(Self::Id(id));
        }
        let handle = trimmed.trim_start_matches('@');
        if handle.is_empty() || handle.chars().any(char::is_whitespace) {
            return Err(Error::invalid_channel(raw));
        }
        Ok(Self::Handle(handle.to_lowercase()))
    }

    /// Stable key used to persist per-channel state.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Whether an event from `chat_id` (with optional public `username`)
    /// belongs to this channel.
    #[must_use]
    pub fn matches(&self, chat_id: i64, username: Option<&str>) -> bool {
        match self {
            Self::Id(id) => *id == chat_id,
            Self::Handle(handle) => username
                .map(|u| u.trim_start_matches('@'))
                .is_some_and(|u| u.eq_ignore_ascii_case(handle)),
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Handle(handle) => write!(f, "@{handle}"),
        }
    }
}

impl std::str::FromStr for ChannelRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ChannelRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChannelRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(id) => Ok(Self::Id(id)),
            Raw::Str(s) => Self::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}
