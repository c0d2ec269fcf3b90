//! Scripted platform and stores for pipeline tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::{HashMap, VecDeque},
    hash::{DefaultHasher, Hash, Hasher},
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    chanrelay_common::{ChannelRef, EventId, SourceChannel, TargetChannel},
    chanrelay_cursor::{CursorRecord, CursorStore, InMemoryCursorStore},
    tokio::{sync::mpsc, time::Instant},
};

use crate::{
    platform::{
        ChatMetadata, Event, EventHandle, EventKind, EventStream, Identity, Platform,
        PlatformError, PlatformResult,
    },
    queue::{QueueItem, QueueReceiver},
};

fn chat_id(source: &SourceChannel) -> i64 {
    match source {
        ChannelRef::Id(id) => *id,
        ChannelRef::Handle(handle) => {
            let mut hasher = DefaultHasher::new();
            handle.hash(&mut hasher);
            -((hasher.finish() >> 2) as i64)
        },
    }
}

pub(crate) fn content(source: &SourceChannel, id: EventId) -> Event {
    Event {
        source: source.clone(),
        id,
        kind: EventKind::Content,
        handle: EventHandle {
            chat_id: chat_id(source),
            event_id: id,
        },
    }
}

pub(crate) fn service(source: &SourceChannel, id: EventId) -> Event {
    Event {
        kind: EventKind::Service,
        ..content(source, id)
    }
}

pub(crate) fn item(source: &SourceChannel, id: EventId) -> QueueItem {
    QueueItem::from_event(content(source, id))
}

/// Event ids currently waiting in `rx`.
pub(crate) fn drain(rx: &mut QueueReceiver) -> Vec<EventId> {
    std::iter::from_fn(|| rx.try_recv())
        .map(|i| i.event_id)
        .collect()
}

/// Poll `cond` until it holds. Panics after a minute of (possibly paused) time.
pub(crate) async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(60), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[derive(Default)]
struct Script {
    connect_failures: VecDeque<PlatformError>,
    history: HashMap<SourceChannel, Vec<Event>>,
    history_errors: HashMap<SourceChannel, PlatformError>,
    history_calls: Vec<(SourceChannel, EventId)>,
    delivery_failures: HashMap<(SourceChannel, EventId), VecDeque<PlatformError>>,
    attempts: Vec<(SourceChannel, EventId, Instant)>,
    delivered: Vec<(SourceChannel, EventId)>,
    acked: Vec<(SourceChannel, EventId)>,
    live_tx: Option<mpsc::Sender<PlatformResult<Event>>>,
    pending_live: Vec<PlatformResult<Event>>,
    subscriptions: Vec<Vec<SourceChannel>>,
    known: HashMap<i64, SourceChannel>,
    connects: u32,
    resets: u32,
    disconnects: u32,
}

/// In-memory [`Platform`] whose history, failures and live events are set up
/// by the test.
#[derive(Default)]
pub(crate) struct ScriptedPlatform {
    script: Mutex<Script>,
}

impl ScriptedPlatform {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    fn know(script: &mut Script, source: &SourceChannel) {
        script.known.insert(chat_id(source), source.clone());
    }

    fn source_of(script: &Script, handle: &EventHandle) -> SourceChannel {
        script
            .known
            .get(&handle.chat_id)
            .cloned()
            .unwrap_or(ChannelRef::Id(handle.chat_id))
    }

    /// Append content events with `ids` to `source`'s history.
    pub(crate) fn with_history(
        &self,
        source: &SourceChannel,
        ids: impl IntoIterator<Item = EventId>,
    ) {
        self.with_events(ids.into_iter().map(|id| content(source, id)));
    }

    pub(crate) fn with_events(&self, events: impl IntoIterator<Item = Event>) {
        let mut script = self.script();
        for event in events {
            Self::know(&mut script, &event.source);
            let history = script.history.entry(event.source.clone()).or_default();
            history.push(event);
            history.sort_by_key(|e| e.id);
        }
    }

    pub(crate) fn fail_history(&self, source: &SourceChannel, err: PlatformError) {
        let mut script = self.script();
        Self::know(&mut script, source);
        script.history_errors.insert(source.clone(), err);
    }

    /// Fail delivery of `(source, id)` with `errors`, in order, then succeed.
    pub(crate) fn fail_delivery(
        &self,
        source: &SourceChannel,
        id: EventId,
        errors: impl IntoIterator<Item = PlatformError>,
    ) {
        let mut script = self.script();
        Self::know(&mut script, source);
        script
            .delivery_failures
            .entry((source.clone(), id))
            .or_default()
            .extend(errors);
    }

    pub(crate) fn fail_connect(&self, errors: impl IntoIterator<Item = PlatformError>) {
        self.script().connect_failures.extend(errors);
    }

    /// Push a live event, buffered until someone subscribes.
    pub(crate) fn push_live(&self, event: PlatformResult<Event>) {
        let mut script = self.script();
        match &script.live_tx {
            Some(tx) => tx.try_send(event).unwrap(),
            None => script.pending_live.push(event),
        }
    }

    /// Close the current live stream.
    pub(crate) fn end_live(&self) {
        self.script().live_tx = None;
    }

    pub(crate) fn delivered(&self) -> Vec<(SourceChannel, EventId)> {
        self.script().delivered.clone()
    }

    pub(crate) fn delivered_ids(&self, source: &SourceChannel) -> Vec<EventId> {
        self.script()
            .delivered
            .iter()
            .filter(|(s, _)| s == source)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Ids of `source`'s events settled through [`Platform::ack`], in order.
    pub(crate) fn acked_ids(&self, source: &SourceChannel) -> Vec<EventId> {
        self.script()
            .acked
            .iter()
            .filter(|(s, _)| s == source)
            .map(|(_, id)| *id)
            .collect()
    }

    pub(crate) fn attempts(&self, source: &SourceChannel, id: EventId) -> Vec<Instant> {
        self.script()
            .attempts
            .iter()
            .filter(|(s, i, _)| s == source && *i == id)
            .map(|(_, _, at)| *at)
            .collect()
    }

    pub(crate) fn history_calls(&self, source: &SourceChannel) -> Vec<EventId> {
        self.script()
            .history_calls
            .iter()
            .filter(|(s, _)| s == source)
            .map(|(_, after)| *after)
            .collect()
    }

    pub(crate) fn subscriptions(&self) -> Vec<Vec<SourceChannel>> {
        self.script().subscriptions.clone()
    }

    pub(crate) fn connects(&self) -> u32 {
        self.script().connects
    }

    pub(crate) fn resets(&self) -> u32 {
        self.script().resets
    }

    pub(crate) fn disconnects(&self) -> u32 {
        self.script().disconnects
    }
}

#[async_trait]
impl Platform for ScriptedPlatform {
    async fn connect(&self) -> PlatformResult<Identity> {
        let mut script = self.script();
        script.connects += 1;
        if let Some(err) = script.connect_failures.pop_front() {
            return Err(err);
        }
        Ok(Identity {
            id: 1,
            name: "Scripted".into(),
            username: Some("scripted_bot".into()),
        })
    }

    async fn subscribe(&self, sources: &[SourceChannel]) -> PlatformResult<EventStream> {
        let (tx, rx) = mpsc::channel(1024);
        let mut script = self.script();
        for event in script.pending_live.drain(..) {
            tx.try_send(event).unwrap();
        }
        for source in sources {
            Self::know(&mut script, source);
        }
        script.live_tx = Some(tx);
        script.subscriptions.push(sources.to_vec());
        Ok(rx)
    }

    async fn fetch_history(
        &self,
        source: &SourceChannel,
        after: EventId,
        limit: u32,
    ) -> PlatformResult<Vec<Event>> {
        let mut script = self.script();
        script.history_calls.push((source.clone(), after));
        if let Some(err) = script.history_errors.get(source) {
            return Err(err.clone());
        }
        Ok(script
            .history
            .get(source)
            .into_iter()
            .flatten()
            .filter(|e| e.id > after)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn latest_event(&self, source: &SourceChannel) -> PlatformResult<Option<Event>> {
        let script = self.script();
        if let Some(err) = script.history_errors.get(source) {
            return Err(err.clone());
        }
        Ok(script.history.get(source).and_then(|h| h.last()).cloned())
    }

    async fn deliver(&self, handle: &EventHandle, _target: &TargetChannel) -> PlatformResult<()> {
        let mut script = self.script();
        let source = Self::source_of(&script, handle);
        let key = (source.clone(), handle.event_id);
        script
            .attempts
            .push((source.clone(), handle.event_id, Instant::now()));
        if let Some(err) = script
            .delivery_failures
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        script.delivered.push(key);
        Ok(())
    }

    async fn chat_metadata(&self, _chat: &ChannelRef) -> PlatformResult<ChatMetadata> {
        Ok(ChatMetadata {
            title: Some("Target".into()),
            accessible: true,
        })
    }

    async fn reset_session(&self) -> PlatformResult<()> {
        self.script().resets += 1;
        Ok(())
    }

    fn ack(&self, handle: &EventHandle) {
        let mut script = self.script();
        let source = Self::source_of(&script, handle);
        script.acked.push((source, handle.event_id));
    }

    async fn disconnect(&self) -> PlatformResult<()> {
        self.script().disconnects += 1;
        Ok(())
    }
}

/// Cursor store that remembers every resulting cursor value.
#[derive(Default)]
pub(crate) struct RecordingStore {
    inner: InMemoryCursorStore,
    writes: Mutex<Vec<(String, EventId)>>,
}

impl RecordingStore {
    pub(crate) fn with_cursors(cursors: &[(&SourceChannel, EventId)]) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryCursorStore::with_cursors(cursors.iter().map(|(s, id)| (s.key(), *id))),
            writes: Mutex::default(),
        })
    }

    /// Cursor values observed for `source`, in write order.
    pub(crate) fn history(&self, source: &SourceChannel) -> Vec<EventId> {
        let key = source.key();
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, id)| *id)
            .collect()
    }
}

#[async_trait]
impl CursorStore for RecordingStore {
    async fn get(&self, source: &str) -> chanrelay_cursor::Result<EventId> {
        self.inner.get(source).await
    }

    async fn set(&self, source: &str, event_id: EventId) -> chanrelay_cursor::Result<EventId> {
        let cursor = self.inner.set(source, event_id).await?;
        self.writes.lock().unwrap().push((source.to_string(), cursor));
        Ok(cursor)
    }

    async fn list(&self) -> chanrelay_cursor::Result<Vec<CursorRecord>> {
        self.inner.list().await
    }
}

/// Cursor store that is always down.
pub(crate) struct UnavailableStore;

#[async_trait]
impl CursorStore for UnavailableStore {
    async fn get(&self, _source: &str) -> chanrelay_cursor::Result<EventId> {
        Err(chanrelay_cursor::Error::message("database is locked"))
    }

    async fn set(&self, _source: &str, _event_id: EventId) -> chanrelay_cursor::Result<EventId> {
        Err(chanrelay_cursor::Error::message("database is locked"))
    }

    async fn list(&self) -> chanrelay_cursor::Result<Vec<CursorRecord>> {
        Err(chanrelay_cursor::Error::message("database is locked"))
    }
}
