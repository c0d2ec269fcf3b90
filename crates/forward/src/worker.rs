//! Delivery workers.
//!
//! Each worker owns one queue shard and runs every item through
//! `Pending -> InFlight -> {Done | RateLimited -> InFlight | Failed}`.
//! Item-level failures are counted and dropped; only connection-level platform
//! errors and cursor store failures leave [`Worker::run`].

use std::{sync::Arc, time::Duration};

use {
    chanrelay_common::{EventId, TargetChannel},
    chanrelay_config::ForwardingConfig,
    chanrelay_cursor::CursorStore,
    tokio::time::{Instant, sleep_until},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use chanrelay_metrics::{counter, histogram, relay as relay_metrics};

use crate::{
    counters::{Counters, SkipReason},
    error::Result,
    platform::{ErrorScope, Platform, PlatformError, PlatformResult},
    queue::{QueueItem, QueueReceiver},
};

/// Retry policy for transport failures. Rate limits are always honored.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    /// Retries after the first transport failure before the item is dropped.
    pub transport_retry_limit: u32,
    pub transport_retry_delay: Duration,
}

impl From<&ForwardingConfig> for DeliveryPolicy {
    fn from(config: &ForwardingConfig) -> Self {
        Self {
            transport_retry_limit: config.transport_retry_limit,
            transport_retry_delay: config.transport_retry_delay(),
        }
    }
}

/// Where an item is in the delivery protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    InFlight { attempt: u32 },
    RateLimited { until: Instant, attempt: u32 },
    Done { cursor: EventId },
    Failed(SkipReason),
}

/// Terminal result of [`Worker::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Delivered; `cursor` is the source's cursor after the max-upsert.
    Forwarded { cursor: EventId },
    Skipped(SkipReason),
    /// Shutdown interrupted a wait. The item stays undelivered.
    Cancelled,
}

pub struct Worker {
    index: usize,
    queue: QueueReceiver,
    platform: Arc<dyn Platform>,
    store: Arc<dyn CursorStore>,
    target: TargetChannel,
    counters: Arc<Counters>,
    policy: DeliveryPolicy,
    cancel: CancellationToken,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        queue: QueueReceiver,
        platform: Arc<dyn Platform>,
        store: Arc<dyn CursorStore>,
        target: TargetChannel,
        counters: Arc<Counters>,
        policy: DeliveryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            index,
            queue,
            platform,
            store,
            target,
            counters,
            policy,
            cancel,
        }
    }

    /// Consume the shard until cancelled or every producer is gone.
    pub async fn run(mut self) -> Result<()> {
        debug!(worker = self.index, "worker started");
        loop {
            let item = tokio::select! {
                () = self.cancel.cancelled() => break,
                item = self.queue.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            if self.process(item).await? == ItemOutcome::Cancelled {
                break;
            }
        }
        debug!(worker = self.index, "worker stopped");
        Ok(())
    }

    /// Run one item through the delivery protocol.
    pub async fn process(&self, item: QueueItem) -> Result<ItemOutcome> {
        let key = item.source.key();
        let mut transport_failures = 0u32;
        let mut state = ItemState::Pending;

        loop {
            state = match state {
                ItemState::Pending => {
                    let cursor = self.store.get(&key).await?;
                    if item.event_id <= cursor {
                        debug!(
                            source = %item.source,
                            event_id = item.event_id,
                            cursor,
                            "already forwarded"
                        );
                        ItemState::Failed(SkipReason::Duplicate)
                    } else {
                        ItemState::InFlight { attempt: 1 }
                    }
                },
                ItemState::InFlight { attempt } => {
                    match self.deliver(&item).await {
                        Ok(()) => ItemState::Done {
                            cursor: self.store.set(&key, item.event_id).await?,
                        },
                        Err(PlatformError::RateLimited { retry_after }) => {
                            warn!(
                                source = %item.source,
                                event_id = item.event_id,
                                retry_after_secs = retry_after.as_secs(),
                                attempt,
                                "rate limited, waiting"
                            );
                            #[cfg(feature = "metrics")]
                            counter!(relay_metrics::RATE_LIMITED_TOTAL).increment(1);
                            ItemState::RateLimited {
                                until: Instant::now() + retry_after,
                                attempt,
                            }
                        },
                        Err(e @ PlatformError::Transport { .. }) => {
                            #[cfg(feature = "metrics")]
                            counter!(relay_metrics::TRANSPORT_ERRORS_TOTAL).increment(1);
                            transport_failures += 1;
                            if transport_failures > self.policy.transport_retry_limit {
                                warn!(
                                    source = %item.source,
                                    event_id = item.event_id,
                                    attempt,
                                    error = %e,
                                    "transport retries exhausted"
                                );
                                ItemState::Failed(SkipReason::TransportExhausted)
                            } else {
                                warn!(
                                    source = %item.source,
                                    event_id = item.event_id,
                                    attempt,
                                    retry_in_secs = self.policy.transport_retry_delay.as_secs(),
                                    error = %e,
                                    "transport error, retrying"
                                );
                                let until = Instant::now() + self.policy.transport_retry_delay;
                                if !self.pause_until(until).await {
                                    return Ok(ItemOutcome::Cancelled);
                                }
                                ItemState::InFlight {
                                    attempt: attempt + 1,
                                }
                            }
                        },
                        Err(e @ PlatformError::PermissionDenied { .. }) => {
                            warn!(
                                source = %item.source,
                                event_id = item.event_id,
                                target = %self.target,
                                error = %e,
                                "cannot write to target"
                            );
                            ItemState::Failed(SkipReason::PermissionDenied)
                        },
                        Err(e) if e.scope() == ErrorScope::Connection => return Err(e.into()),
                        Err(e) => {
                            warn!(
                                source = %item.source,
                                event_id = item.event_id,
                                error = %e,
                                "delivery failed"
                            );
                            ItemState::Failed(SkipReason::Unclassified)
                        },
                    }
                },
                ItemState::RateLimited { until, attempt } => {
                    if !self.pause_until(until).await {
                        return Ok(ItemOutcome::Cancelled);
                    }
                    ItemState::InFlight {
                        attempt: attempt + 1,
                    }
                },
                ItemState::Done { cursor } => {
                    self.platform.ack(&item.handle);
                    let counts = self.counters.record_forwarded();
                    info!(
                        source = %item.source,
                        event_id = item.event_id,
                        cursor,
                        waited_ms = item.enqueued_at.elapsed().as_millis() as u64,
                        queued = counts.queued,
                        forwarded = counts.forwarded,
                        skipped = counts.skipped,
                        "forwarded"
                    );
                    return Ok(ItemOutcome::Forwarded { cursor });
                },
                ItemState::Failed(reason) => {
                    self.platform.ack(&item.handle);
                    let counts = self.counters.record_skipped(reason);
                    info!(
                        source = %item.source,
                        event_id = item.event_id,
                        reason = reason.as_str(),
                        queued = counts.queued,
                        forwarded = counts.forwarded,
                        skipped = counts.skipped,
                        "skipped"
                    );
                    return Ok(ItemOutcome::Skipped(reason));
                },
            };
        }
    }

    async fn deliver(&self, item: &QueueItem) -> PlatformResult<()> {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();
        let result = self.platform.deliver(&item.handle, &self.target).await;
        #[cfg(feature = "metrics")]
        histogram!(relay_metrics::DELIVERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// Sleep until `deadline`. Returns `false` when shutdown interrupted it.
    async fn pause_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = sleep_until(deadline) => true,
        }
    }
}
