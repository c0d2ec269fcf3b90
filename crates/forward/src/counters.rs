//! Process-lifetime tallies reported in log lines and `/status`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[cfg(feature = "metrics")]
use chanrelay_metrics::{counter, labels, relay as relay_metrics};

/// Why an event was dropped without delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Already at or behind the cursor.
    Duplicate,
    /// The target refused the write.
    PermissionDenied,
    /// Transport retries ran out.
    TransportExhausted,
    Unclassified,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::PermissionDenied => "permission_denied",
            Self::TransportExhausted => "transport_exhausted",
            Self::Unclassified => "unclassified",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub queued: u64,
    pub forwarded: u64,
    pub skipped: u64,
}

/// `{queued, forwarded, skipped}` counters. Observability only.
#[derive(Debug, Default)]
pub struct Counters {
    queued: AtomicU64,
    forwarded: AtomicU64,
    skipped: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_queued(&self) -> CounterSnapshot {
        self.queued.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!(relay_metrics::QUEUED_TOTAL).increment(1);
        self.snapshot()
    }

    pub fn record_forwarded(&self) -> CounterSnapshot {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!(relay_metrics::FORWARDED_TOTAL).increment(1);
        self.snapshot()
    }

    pub fn record_skipped(&self, reason: SkipReason) -> CounterSnapshot {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!(relay_metrics::SKIPPED_TOTAL, labels::REASON => reason.as_str()).increment(1);
        #[cfg(not(feature = "metrics"))]
        let _ = reason;
        self.snapshot()
    }

    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_return_running_totals() {
        let counters = Counters::new();
        counters.record_queued();
        counters.record_queued();
        let snap = counters.record_forwarded();
        assert_eq!(snap, CounterSnapshot {
            queued: 2,
            forwarded: 1,
            skipped: 0
        });
        assert_eq!(counters.record_skipped(SkipReason::Duplicate).skipped, 1);
    }
}
