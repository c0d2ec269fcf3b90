//! Merge point between catch-up and live ingestion.
//!
//! While a source is being reconciled its live events are held back, then
//! released in id order once catch-up has enqueued the backlog. The gate also
//! remembers the last id it enqueued per source and refuses anything not
//! strictly greater, so each source's queued ids form a strictly increasing
//! sequence no matter how the two producers interleave.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use {
    chanrelay_common::{EventId, SourceChannel, UNSET_EVENT_ID},
    tracing::{debug, info},
};

use crate::{
    counters::{Counters, SkipReason},
    error::{Error, Result},
    platform::{Event, EventHandle, Platform},
    queue::{QueueItem, QueueSender},
};

/// What happened to an offered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// Held until the source's catch-up finishes.
    Buffered,
    /// Not newer than what was already enqueued for the source.
    Duplicate,
    /// The event's source is not part of this cycle.
    UnknownSource,
}

#[derive(Debug, Default)]
struct SourceGate {
    reconciling: bool,
    buffered: BTreeMap<EventId, Event>,
    last_enqueued: EventId,
}

pub struct IngestGate {
    queue: QueueSender,
    counters: Arc<Counters>,
    platform: Arc<dyn Platform>,
    sources: Mutex<HashMap<SourceChannel, SourceGate>>,
}

impl IngestGate {
    pub fn new(queue: QueueSender, counters: Arc<Counters>, platform: Arc<dyn Platform>) -> Self {
        Self {
            queue,
            counters,
            platform,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Settle an event that will never reach a worker.
    pub fn settle(&self, handle: &EventHandle) {
        self.platform.ack(handle);
    }

    /// Register `source` and hold its live events until
    /// [`IngestGate::finish_reconcile`].
    pub fn begin_reconcile(&self, source: &SourceChannel) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources.entry(source.clone()).or_default().reconciling = true;
    }

    /// Whether `source` is still catching up.
    #[must_use]
    pub fn is_reconciling(&self, source: &SourceChannel) -> bool {
        let sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources.get(source).is_some_and(|s| s.reconciling)
    }

    /// Offer an event from the push stream.
    pub fn offer_live(&self, event: Event) -> Result<Admission> {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        let Some(gate) = sources.get_mut(&event.source) else {
            debug!(
                source = %event.source,
                event_id = event.id,
                "event from unknown source dropped"
            );
            self.settle(&event.handle);
            return Ok(Admission::UnknownSource);
        };
        if gate.reconciling {
            debug!(
                source = %event.source,
                event_id = event.id,
                "live event held during catch-up"
            );
            gate.buffered.insert(event.id, event);
            return Ok(Admission::Buffered);
        }
        self.admit(gate, event)
    }

    /// Enqueue an event found by catch-up.
    pub fn enqueue_catchup(&self, event: Event) -> Result<Admission> {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        let Some(gate) = sources.get_mut(&event.source) else {
            self.settle(&event.handle);
            return Ok(Admission::UnknownSource);
        };
        self.admit(gate, event)
    }

    /// End catch-up for `source` and release held live events.
    ///
    /// `floor` is the source's cursor after catch-up; held events at or below
    /// it are dropped. Returns how many events were queued.
    pub fn finish_reconcile(&self, source: &SourceChannel, floor: EventId) -> Result<usize> {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        let Some(gate) = sources.get_mut(source) else {
            return Ok(0);
        };
        gate.reconciling = false;
        gate.last_enqueued = gate.last_enqueued.max(floor);

        let held = std::mem::take(&mut gate.buffered);
        let mut released = 0;
        for event in held.into_values() {
            if self.admit(gate, event)? == Admission::Queued {
                released += 1;
            }
        }
        if released > 0 {
            info!(source = %source, released, "released live events held during catch-up");
        }
        Ok(released)
    }

    fn admit(&self, gate: &mut SourceGate, event: Event) -> Result<Admission> {
        if gate.last_enqueued != UNSET_EVENT_ID && event.id <= gate.last_enqueued {
            let counts = self.counters.record_skipped(SkipReason::Duplicate);
            info!(
                source = %event.source,
                event_id = event.id,
                last_enqueued = gate.last_enqueued,
                queued = counts.queued,
                forwarded = counts.forwarded,
                skipped = counts.skipped,
                "skipped"
            );
            self.settle(&event.handle);
            return Ok(Admission::Duplicate);
        }

        let (source, event_id) = (event.source.clone(), event.id);
        self.queue
            .push(QueueItem::from_event(event))
            .map_err(|_| Error::QueueClosed)?;
        gate.last_enqueued = event_id;

        let counts = self.counters.record_queued();
        info!(
            source = %source,
            event_id,
            queued = counts.queued,
            forwarded = counts.forwarded,
            skipped = counts.skipped,
            "queued"
        );
        Ok(Admission::Queued)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            queue::{self, QueueReceiver},
            test_support::{ScriptedPlatform, content, drain},
        },
    };

    fn gate() -> (IngestGate, QueueReceiver, Arc<Counters>) {
        let (gate, rx, counters, _) = gate_with_platform();
        (gate, rx, counters)
    }

    fn gate_with_platform() -> (IngestGate, QueueReceiver, Arc<Counters>, Arc<ScriptedPlatform>) {
        let (tx, mut rxs) = queue::channel(1);
        let counters = Arc::new(Counters::new());
        let platform = ScriptedPlatform::new();
        (
            IngestGate::new(tx, Arc::clone(&counters), platform.clone()),
            rxs.remove(0),
            counters,
            platform,
        )
    }

    #[tokio::test]
    async fn live_events_wait_for_catch_up() {
        let (gate, mut rx, _) = gate();
        let src = SourceChannel::Id(-1);
        gate.begin_reconcile(&src);

        assert_eq!(gate.offer_live(content(&src, 205)).unwrap(), Admission::Buffered);
        assert_eq!(gate.offer_live(content(&src, 203)).unwrap(), Admission::Buffered);
        for id in [201, 202, 203] {
            assert_eq!(
                gate.enqueue_catchup(content(&src, id)).unwrap(),
                Admission::Queued
            );
        }
        assert_eq!(gate.finish_reconcile(&src, 200).unwrap(), 1);
        assert!(!gate.is_reconciling(&src));

        assert_eq!(drain(&mut rx), vec![201, 202, 203, 205]);
    }

    #[tokio::test]
    async fn refuses_ids_not_strictly_greater() {
        let (gate, mut rx, counters) = gate();
        let src = SourceChannel::Id(-1);
        gate.begin_reconcile(&src);
        gate.finish_reconcile(&src, 0).unwrap();

        assert_eq!(gate.offer_live(content(&src, 10)).unwrap(), Admission::Queued);
        assert_eq!(gate.offer_live(content(&src, 10)).unwrap(), Admission::Duplicate);
        assert_eq!(gate.offer_live(content(&src, 9)).unwrap(), Admission::Duplicate);
        assert_eq!(gate.offer_live(content(&src, 11)).unwrap(), Admission::Queued);

        assert_eq!(drain(&mut rx), vec![10, 11]);
        let snap = counters.snapshot();
        assert_eq!((snap.queued, snap.skipped), (2, 2));
    }

    #[tokio::test]
    async fn held_events_at_or_below_floor_are_dropped() {
        let (gate, mut rx, counters) = gate();
        let src = SourceChannel::Handle("news".into());
        gate.begin_reconcile(&src);
        gate.offer_live(content(&src, 499)).unwrap();
        gate.offer_live(content(&src, 500)).unwrap();
        gate.offer_live(content(&src, 501)).unwrap();

        // catch-up initialized the cursor at the newest event, 500
        assert_eq!(gate.finish_reconcile(&src, 500).unwrap(), 1);
        assert_eq!(drain(&mut rx), vec![501]);
        assert_eq!(counters.snapshot().skipped, 2);
    }

    #[tokio::test]
    async fn sources_are_independent() {
        let (gate, mut rx, _) = gate();
        let a = SourceChannel::Id(-1);
        let b = SourceChannel::Id(-2);
        gate.begin_reconcile(&a);
        gate.begin_reconcile(&b);
        gate.finish_reconcile(&b, 0).unwrap();

        assert_eq!(gate.offer_live(content(&a, 5)).unwrap(), Admission::Buffered);
        assert_eq!(gate.offer_live(content(&b, 1)).unwrap(), Admission::Queued);
        assert_eq!(drain(&mut rx), vec![1]);
    }

    #[test]
    fn dropped_events_are_settled() {
        let (gate, mut rx, _, platform) = gate_with_platform();
        let src = SourceChannel::Id(-1);
        gate.begin_reconcile(&src);
        gate.offer_live(content(&src, 7)).unwrap();
        gate.offer_live(content(&src, 9)).unwrap();
        gate.finish_reconcile(&src, 8).unwrap();
        gate.offer_live(content(&src, 9)).unwrap();
        gate.offer_live(content(&SourceChannel::Id(99), 1)).unwrap();

        assert_eq!(drain(&mut rx), vec![9]);
        // the queued 9 is settled by its worker, not by the gate
        assert_eq!(platform.acked_ids(&src), vec![7, 9]);
        assert_eq!(platform.acked_ids(&SourceChannel::Id(99)), vec![1]);
    }

    #[test]
    fn unknown_source_is_ignored() {
        let (gate, _rx, counters) = gate();
        let admission = gate.offer_live(content(&SourceChannel::Id(99), 1)).unwrap();
        assert_eq!(admission, Admission::UnknownSource);
        assert_eq!(counters.snapshot(), Default::default());
    }
}
