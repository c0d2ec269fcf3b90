//! Metrics for the forwarding pipeline.
//!
//! Crates record through the `metrics` facade macros re-exported here; nothing
//! is collected until [`init_metrics`] installs a recorder. With the
//! `prometheus` feature the recorder renders the Prometheus text format.
//!
//! ```rust,ignore
//! use chanrelay_metrics::{counter, relay};
//!
//! counter!(relay::FORWARDED_TOTAL).increment(1);
//! ```

mod definitions;
mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
