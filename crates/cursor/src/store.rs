//! Persistence trait for forwarding cursors.

use {async_trait::async_trait, chanrelay_common::EventId, serde::Serialize};

use crate::Result;

/// A stored cursor row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CursorRecord {
    /// Source key as produced by `ChannelRef::key`.
    pub source: String,
    pub last_event_id: EventId,
    pub updated_at_ms: u64,
}

/// Durable `source -> last forwarded event id` map.
///
/// Implementations must make [`CursorStore::set`] an atomic max-upsert.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last forwarded id for `source`, or `UNSET_EVENT_ID` when never seen.
    async fn get(&self, source: &str) -> Result<EventId>;

    /// Record `event_id` as forwarded for `source`.
    ///
    /// Stores `max(current, event_id)` and returns the resulting cursor, which
    /// is larger than `event_id` when a concurrent writer got further first.
    async fn set(&self, source: &str, event_id: EventId) -> Result<EventId>;

    /// Every stored cursor, ordered by source key.
    async fn list(&self) -> Result<Vec<CursorRecord>>;
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
