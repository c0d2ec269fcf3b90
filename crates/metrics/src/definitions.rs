//! Metric name and label definitions.

/// Forwarding pipeline metrics
pub mod relay {
    /// Events accepted into the forwarding queue
    pub const QUEUED_TOTAL: &str = "chanrelay_events_queued_total";
    /// Events copied to the target
    pub const FORWARDED_TOTAL: &str = "chanrelay_events_forwarded_total";
    /// Events dropped without delivery (label: `reason`)
    pub const SKIPPED_TOTAL: &str = "chanrelay_events_skipped_total";
    /// Rate-limit signals received from the platform
    pub const RATE_LIMITED_TOTAL: &str = "chanrelay_rate_limited_total";
    /// Transport failures while delivering
    pub const TRANSPORT_ERRORS_TOTAL: &str = "chanrelay_transport_errors_total";
    /// Time spent in a single delivery call
    pub const DELIVERY_DURATION_SECONDS: &str = "chanrelay_delivery_duration_seconds";
    /// Items waiting in the queue
    pub const QUEUE_DEPTH: &str = "chanrelay_queue_depth";
}

/// Connection lifecycle metrics
pub mod supervisor {
    /// Run cycles that ended in a fatal error and were restarted
    pub const RECONNECTS_TOTAL: &str = "chanrelay_reconnects_total";
    /// Session resets after repeated stale-session faults
    pub const SESSION_RESETS_TOTAL: &str = "chanrelay_session_resets_total";
}

/// Common label keys
pub mod labels {
    pub const REASON: &str = "reason";
}

/// Histogram buckets
pub mod buckets {
    /// Delivery latency: one Bot API round trip, seconds.
    pub const DELIVERY_DURATION: [f64; 10] =
        [0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];
}
