//! Catch-up reconciliation.
//!
//! At the start of a run cycle every source walks its history from the stored
//! cursor and enqueues what was missed while nothing was listening. Sources are
//! reconciled concurrently and independently: a source that cannot be read is
//! logged and left alone, it never holds back the others.

use std::sync::Arc;

use {
    chanrelay_common::{EventId, SourceChannel, UNSET_EVENT_ID},
    chanrelay_config::{ForwardingConfig, NewSourcePolicy},
    chanrelay_cursor::CursorStore,
    tokio::task::JoinSet,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    ingest::{Admission, IngestGate},
    platform::{ErrorScope, Platform},
};

/// Catch-up settings taken from [`ForwardingConfig`].
#[derive(Debug, Clone, Copy)]
pub struct CatchUpPolicy {
    pub new_source: NewSourcePolicy,
    pub backfill_window: u32,
    pub page_size: u32,
}

impl From<&ForwardingConfig> for CatchUpPolicy {
    fn from(config: &ForwardingConfig) -> Self {
        Self {
            new_source: config.new_source,
            backfill_window: config.backfill_window,
            page_size: config.history_page_size.max(1),
        }
    }
}

/// What catch-up did for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub source: SourceChannel,
    /// Cursor the catch-up started from.
    pub start_cursor: EventId,
    /// Cursor recorded for a never-seen source under `skip_backlog`.
    pub initialized_at: Option<EventId>,
    pub enqueued: usize,
}

pub struct Reconciler {
    platform: Arc<dyn Platform>,
    store: Arc<dyn CursorStore>,
    gate: Arc<IngestGate>,
    policy: CatchUpPolicy,
}

impl Reconciler {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn CursorStore>,
        gate: Arc<IngestGate>,
        policy: CatchUpPolicy,
    ) -> Self {
        Self {
            platform,
            store,
            gate,
            policy,
        }
    }

    /// Reconcile every source concurrently, one task each.
    ///
    /// The caller must have registered each source with
    /// [`IngestGate::begin_reconcile`]; this releases them as they finish.
    /// Per-source failures are logged; cursor store and connection-level
    /// errors abort and are returned.
    pub async fn run_all(
        self: Arc<Self>,
        sources: Vec<SourceChannel>,
        cancel: CancellationToken,
    ) -> Result<Vec<ReconcileReport>> {
        let mut tasks = JoinSet::new();
        for source in sources {
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            tasks.spawn(async move { this.run_source(source, cancel).await });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Some(report) = joined?? {
                reports.push(report);
            }
        }
        info!(
            sources = reports.len(),
            enqueued = reports.iter().map(|r| r.enqueued).sum::<usize>(),
            "catch-up finished"
        );
        Ok(reports)
    }

    /// Reconcile one source and release its held live events, whatever the
    /// outcome. `Ok(None)` means the source was skipped.
    async fn run_source(
        &self,
        source: SourceChannel,
        cancel: CancellationToken,
    ) -> Result<Option<ReconcileReport>> {
        let result = self.reconcile_source(&source, &cancel).await;
        let floor = match &result {
            Ok(report) => report.initialized_at.unwrap_or(report.start_cursor),
            Err(_) => UNSET_EVENT_ID,
        };
        self.gate.finish_reconcile(&source, floor)?;

        match result {
            Ok(report) => Ok(Some(report)),
            Err(Error::Platform(e)) if e.scope() == ErrorScope::Item => {
                warn!(source = %source, error = %e, "catch-up skipped for source");
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    /// Walk `source` from its cursor and enqueue every content event past it.
    pub async fn reconcile_source(
        &self,
        source: &SourceChannel,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport> {
        let key = source.key();
        let start_cursor = self.store.get(&key).await?;
        let mut report = ReconcileReport {
            source: source.clone(),
            start_cursor,
            initialized_at: None,
            enqueued: 0,
        };

        let walk_from = if start_cursor == UNSET_EVENT_ID {
            let Some(latest) = self.platform.latest_event(source).await? else {
                info!(source = %source, "new source has no history");
                return Ok(report);
            };
            match self.policy.new_source {
                NewSourcePolicy::SkipBacklog => {
                    let cursor = self.store.set(&key, latest.id).await?;
                    info!(source = %source, cursor, "new source, backlog skipped");
                    report.initialized_at = Some(cursor);
                    return Ok(report);
                },
                NewSourcePolicy::Backfill => {
                    let from = latest
                        .id
                        .saturating_sub(EventId::from(self.policy.backfill_window));
                    // pin the window so a restart resumes it instead of sliding it
                    let from = if from == UNSET_EVENT_ID {
                        from
                    } else {
                        let cursor = self.store.set(&key, from).await?;
                        report.initialized_at = Some(cursor);
                        cursor
                    };
                    info!(source = %source, from, latest = latest.id, "new source, backfilling");
                    from
                },
            }
        } else {
            start_cursor
        };

        report.enqueued = self.walk(source, walk_from, cancel).await?;
        if report.enqueued > 0 {
            info!(
                source = %source,
                from = walk_from,
                enqueued = report.enqueued,
                "catch-up enqueued backlog"
            );
        } else {
            debug!(source = %source, cursor = walk_from, "source is up to date");
        }
        Ok(report)
    }

    /// Page through history after `from`, ascending, until a short page.
    async fn walk(
        &self,
        source: &SourceChannel,
        from: EventId,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let key = source.key();
        let mut after = from;
        let mut enqueued = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let page = self
                .platform
                .fetch_history(source, after, self.policy.page_size)
                .await?;
            let full_page = page.len() >= self.policy.page_size as usize;
            // Concurrent deliveries may have moved the cursor since the last page.
            let cursor = self.store.get(&key).await?;
            let page_start = after;

            for event in page {
                if event.id <= after {
                    continue;
                }
                after = event.id;
                if !event.is_content() || event.id <= cursor {
                    continue;
                }
                if self.gate.enqueue_catchup(event)? == Admission::Queued {
                    enqueued += 1;
                }
            }

            if !full_page || after == page_start {
                break;
            }
        }
        Ok(enqueued)
    }
}
