//! Unbounded FIFO delivery queue, sharded by source.
//!
//! Every item of a given source lands on the same shard, so one worker sees
//! that source's items in enqueue order. Platform rate limits are the only
//! throttle; the queue applies no backpressure.

use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    chanrelay_common::{EventId, SourceChannel},
    tokio::{sync::mpsc, time::Instant},
};

#[cfg(feature = "metrics")]
use chanrelay_metrics::{gauge, relay as relay_metrics};

use crate::platform::{Event, EventHandle};

/// A pending delivery job.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub source: SourceChannel,
    pub event_id: EventId,
    pub handle: EventHandle,
    pub enqueued_at: Instant,
}

impl QueueItem {
    pub fn from_event(event: Event) -> Self {
        Self {
            source: event.source,
            event_id: event.id,
            handle: event.handle,
            enqueued_at: Instant::now(),
        }
    }
}

/// Producer side, shared by the reconciler and the listener.
#[derive(Debug, Clone)]
pub struct QueueSender {
    shards: Vec<mpsc::UnboundedSender<QueueItem>>,
    depth: Arc<AtomicUsize>,
}

/// Consumer side of one shard, owned by one worker.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<QueueItem>,
    depth: Arc<AtomicUsize>,
}

/// Build a queue with `shards` consumer ends (at least one).
pub fn channel(shards: usize) -> (QueueSender, Vec<QueueReceiver>) {
    let depth = Arc::new(AtomicUsize::new(0));
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..shards.max(1))
        .map(|_| {
            let (tx, rx) = mpsc::unbounded_channel();
            (tx, QueueReceiver {
                rx,
                depth: Arc::clone(&depth),
            })
        })
        .unzip();
    (
        QueueSender {
            shards: senders,
            depth,
        },
        receivers,
    )
}

impl QueueSender {
    /// Append `item` to its source's shard. Gives the item back when the
    /// consumer is gone.
    pub fn push(&self, item: QueueItem) -> Result<(), QueueItem> {
        let shard = self.shard_for(&item.source);
        self.shards[shard].send(item).map_err(|e| e.0)?;
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        #[cfg(feature = "metrics")]
        gauge!(relay_metrics::QUEUE_DEPTH).set(depth as f64);
        #[cfg(not(feature = "metrics"))]
        let _ = depth;
        Ok(())
    }

    /// Items pushed but not yet taken by a worker.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub(crate) fn shard_for(&self, source: &SourceChannel) -> usize {
        if self.shards.len() == 1 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }
}

impl QueueReceiver {
    /// Next item, `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<QueueItem> {
        let item = self.rx.recv().await?;
        let depth = self.depth.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        #[cfg(feature = "metrics")]
        gauge!(relay_metrics::QUEUE_DEPTH).set(depth as f64);
        #[cfg(not(feature = "metrics"))]
        let _ = depth;
        Some(item)
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<QueueItem> {
        let item = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        Some(item)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::test_support::content};

    #[tokio::test]
    async fn single_shard_is_fifo_across_sources() {
        let (tx, mut rxs) = channel(1);
        let a = SourceChannel::Id(-1);
        let b = SourceChannel::Id(-2);
        for (src, id) in [(&a, 1), (&b, 7), (&a, 2)] {
            tx.push(QueueItem::from_event(content(src, id))).unwrap();
        }
        assert_eq!(tx.depth(), 3);

        let rx = &mut rxs[0];
        let got: Vec<_> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|i| (i.source, i.event_id))
        .collect();
        assert_eq!(got, vec![(a.clone(), 1), (b, 7), (a, 2)]);
        assert_eq!(tx.depth(), 0);
    }

    #[tokio::test]
    async fn a_source_always_maps_to_one_shard() {
        let (tx, mut rxs) = channel(4);
        let src = SourceChannel::Handle("news".into());
        let shard = tx.shard_for(&src);
        for id in 1..=5 {
            tx.push(QueueItem::from_event(content(&src, id))).unwrap();
            assert_eq!(tx.shard_for(&src), shard);
        }
        drop(tx);

        let mut ids = Vec::new();
        while let Some(item) = rxs[shard].recv().await {
            ids.push(item.event_id);
        }
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn zero_shards_still_builds_one() {
        let (tx, rxs) = channel(0);
        assert_eq!(tx.shard_count(), 1);
        assert_eq!(rxs.len(), 1);
    }

    #[test]
    fn push_after_consumer_dropped_returns_item() {
        let (tx, rxs) = channel(1);
        drop(rxs);
        let item = QueueItem::from_event(content(&SourceChannel::Id(1), 9));
        assert_eq!(tx.push(item).unwrap_err().event_id, 9);
        assert_eq!(tx.depth(), 0);
    }
}
