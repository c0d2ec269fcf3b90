//! Live listener: turns the platform push stream into queue items.

use std::sync::Arc;

use {
    chanrelay_cursor::CursorStore,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    counters::{Counters, SkipReason},
    error::{Error, Result},
    ingest::IngestGate,
    platform::{ErrorScope, Event, EventStream},
};

pub struct Listener {
    store: Arc<dyn CursorStore>,
    gate: Arc<IngestGate>,
    counters: Arc<Counters>,
}

impl Listener {
    pub fn new(
        store: Arc<dyn CursorStore>,
        gate: Arc<IngestGate>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            store,
            gate,
            counters,
        }
    }

    /// Consume `events` until cancelled.
    ///
    /// Returns [`Error::StreamClosed`] when the platform ends the stream and
    /// the first connection-scoped error it yields.
    pub async fn run(self, mut events: EventStream, cancel: CancellationToken) -> Result<()> {
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                next = events.recv() => next,
            };
            match next {
                None => return Err(Error::StreamClosed),
                Some(Ok(event)) => self.accept(event).await?,
                Some(Err(e)) if e.scope() == ErrorScope::Connection => return Err(e.into()),
                Some(Err(e)) => warn!(error = %e, "live event stream hiccup"),
            }
        }
    }

    /// Enqueue `event` if it is content and newer than its source's cursor.
    /// Never waits on delivery.
    pub async fn accept(&self, event: Event) -> Result<()> {
        if !event.is_content() {
            debug!(source = %event.source, event_id = event.id, "service event ignored");
            self.gate.settle(&event.handle);
            return Ok(());
        }

        let cursor = self.store.get(&event.source.key()).await?;
        if event.id <= cursor {
            let counts = self.counters.record_skipped(SkipReason::Duplicate);
            info!(
                source = %event.source,
                event_id = event.id,
                cursor,
                queued = counts.queued,
                forwarded = counts.forwarded,
                skipped = counts.skipped,
                "skipped"
            );
            self.gate.settle(&event.handle);
            return Ok(());
        }

        self.gate.offer_live(event)?;
        Ok(())
    }
}
