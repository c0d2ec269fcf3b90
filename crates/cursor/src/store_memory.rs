//! In-memory cursor store for tests and dry runs.

use std::{collections::BTreeMap, sync::Mutex};

use {async_trait::async_trait, chanrelay_common::{EventId, UNSET_EVENT_ID}};

use crate::{
    Result,
    store::{CursorRecord, CursorStore, now_ms},
};

/// Cursor store backed by a `BTreeMap`. Nothing survives the process.
#[derive(Default)]
pub struct InMemoryCursorStore {
    cursors: Mutex<BTreeMap<String, (EventId, u64)>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-seeded with cursors.
    pub fn with_cursors<I, K>(cursors: I) -> Self
    where
        I: IntoIterator<Item = (K, EventId)>,
        K: Into<String>,
    {
        let now = now_ms();
        Self {
            cursors: Mutex::new(
                cursors
                    .into_iter()
                    .map(|(k, id)| (k.into(), (id, now)))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get(&self, source: &str) -> Result<EventId> {
        let cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        Ok(cursors.get(source).map_or(UNSET_EVENT_ID, |(id, _)| *id))
    }

    async fn set(&self, source: &str, event_id: EventId) -> Result<EventId> {
        let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        let entry = cursors
            .entry(source.to_string())
            .or_insert((UNSET_EVENT_ID, 0));
        if event_id > entry.0 {
            *entry = (event_id, now_ms());
        }
        Ok(entry.0)
    }

    async fn list(&self) -> Result<Vec<CursorRecord>> {
        let cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        Ok(cursors
            .iter()
            .map(|(source, (id, at))| CursorRecord {
                source: source.clone(),
                last_event_id: *id,
                updated_at_ms: *at,
            })
            .collect())
    }
}
