//! The messaging platform port.
//!
//! Everything the pipeline needs from the outside world: authenticate, stream
//! new events, page through history, copy an event to the target.

use std::{fmt, time::Duration};

use {
    async_trait::async_trait,
    chanrelay_common::{ChannelRef, EventId, SourceChannel, TargetChannel},
    serde::Serialize,
    tokio::sync::mpsc,
};

/// Whether an event carries content worth relaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Content,
    /// Joins, pins, title changes and other housekeeping posts.
    Service,
}

/// What the platform needs to copy an event later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventHandle {
    /// Platform chat the event lives in.
    pub chat_id: i64,
    pub event_id: EventId,
}

/// An event observed in a source channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The configured source this event belongs to.
    pub source: SourceChannel,
    pub id: EventId,
    pub kind: EventKind,
    pub handle: EventHandle,
}

impl Event {
    #[must_use]
    pub fn is_content(&self) -> bool {
        self.kind == EventKind::Content
    }
}

/// The account the platform client is logged in as.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: i64,
    pub name: String,
    pub username: Option<String>,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(username) => write!(f, "{} (@{username}, id {})", self.name, self.id),
            None => write!(f, "{} (id {})", self.name, self.id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMetadata {
    pub title: Option<String>,
    pub accessible: bool,
}

/// Protocol fault classes the supervisor tells apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFault {
    /// Session state drifted from the server (clock skew, dead keep-alive).
    /// Repeated occurrences call for a session reset.
    StaleSession,
    Other,
}

impl fmt::Display for ProtocolFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StaleSession => "stale session",
            Self::Other => "other",
        })
    }
}

/// How far an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Only the current item is affected; the worker keeps consuming.
    Item,
    /// The connection is unusable; the run cycle ends.
    Connection,
}

/// Failures reported by a [`Platform`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlatformError {
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("protocol error ({fault}): {message}")]
    Protocol {
        fault: ProtocolFault,
        message: String,
    },

    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("{operation} is not supported by this platform")]
    Unsupported { operation: &'static str },

    #[error("{message}")]
    Other { message: String },
}

impl PlatformError {
    #[must_use]
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::RateLimited { retry_after }
    }

    #[must_use]
    pub fn permission_denied(message: impl fmt::Display) -> Self {
        Self::PermissionDenied {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn transport(message: impl fmt::Display) -> Self {
        Self::Transport {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn protocol(fault: ProtocolFault, message: impl fmt::Display) -> Self {
        Self::Protocol {
            fault,
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn auth(message: impl fmt::Display) -> Self {
        Self::Auth {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn other(message: impl fmt::Display) -> Self {
        Self::Other {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::Protocol { .. } | Self::Auth { .. } => ErrorScope::Connection,
            Self::RateLimited { .. }
            | Self::PermissionDenied { .. }
            | Self::Transport { .. }
            | Self::Unsupported { .. }
            | Self::Other { .. } => ErrorScope::Item,
        }
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Push stream of new events. Connection-scoped errors end the cycle.
pub type EventStream = mpsc::Receiver<PlatformResult<Event>>;

/// A messaging platform client.
///
/// One instance lives for the whole process; [`Platform::connect`] is called
/// at the start of every run cycle and [`Platform::disconnect`] at its end.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Authenticate and return who we are logged in as.
    async fn connect(&self) -> PlatformResult<Identity>;

    /// Start streaming new events from `sources`.
    ///
    /// Every yielded [`Event::source`] must be one of `sources`.
    async fn subscribe(&self, sources: &[SourceChannel]) -> PlatformResult<EventStream>;

    /// One page of `source` history: events with id greater than `after`,
    /// ascending, at most `limit` of them.
    async fn fetch_history(
        &self,
        source: &SourceChannel,
        after: EventId,
        limit: u32,
    ) -> PlatformResult<Vec<Event>>;

    /// The newest event in `source`, `None` for an empty channel.
    async fn latest_event(&self, source: &SourceChannel) -> PlatformResult<Option<Event>>;

    /// Copy the event behind `handle` to `target`.
    async fn deliver(&self, handle: &EventHandle, target: &TargetChannel) -> PlatformResult<()>;

    async fn chat_metadata(&self, chat: &ChannelRef) -> PlatformResult<ChatMetadata>;

    /// Discard and re-establish session state.
    async fn reset_session(&self) -> PlatformResult<()>;

    /// Mark the event behind `handle` as settled: delivered, skipped, or
    /// already covered by its source's cursor.
    ///
    /// A platform that confirms receipt to its server must not confirm an
    /// event before it is settled, so events dropped at shutdown are sent
    /// again on the next subscription. Called from async code; must not block.
    fn ack(&self, _handle: &EventHandle) {}

    async fn disconnect(&self) -> PlatformResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(PlatformError::rate_limited(Duration::from_secs(5)), ErrorScope::Item)]
    #[case(PlatformError::permission_denied("kicked"), ErrorScope::Item)]
    #[case(PlatformError::transport("reset by peer"), ErrorScope::Item)]
    #[case(PlatformError::Unsupported { operation: "history" }, ErrorScope::Item)]
    #[case(PlatformError::other("??"), ErrorScope::Item)]
    #[case(
        PlatformError::protocol(ProtocolFault::StaleSession, "msg_id too low"),
        ErrorScope::Connection
    )]
    #[case(PlatformError::protocol(ProtocolFault::Other, "bad"), ErrorScope::Connection)]
    #[case(PlatformError::auth("revoked"), ErrorScope::Connection)]
    fn error_scopes(#[case] err: PlatformError, #[case] scope: ErrorScope) {
        assert_eq!(err.scope(), scope);
    }

    #[test]
    fn identity_display() {
        let me = Identity {
            id: 7,
            name: "Relay".into(),
            username: Some("relay_bot".into()),
        };
        assert_eq!(me.to_string(), "Relay (@relay_bot, id 7)");
    }
}
