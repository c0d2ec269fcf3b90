//! Forwarding reconciliation pipeline.
//!
//! Events flow from a set of source channels to one target channel:
//!
//! - [`reconcile`] walks each source's history from its stored cursor at the
//!   start of every run cycle.
//! - [`listener`] consumes the platform's push stream.
//! - Both feed the [`ingest::IngestGate`], which keeps the per-source stream
//!   strictly increasing and hands items to the sharded [`queue`].
//! - [`worker`]s deliver items and advance cursors.
//! - [`supervisor::Supervisor`] wraps [`relay::run_cycle`] with reconnect,
//!   backoff and session-reset policy.
//!
//! The messaging platform is reached only through the [`Platform`] trait.

pub mod counters;
pub mod error;
pub mod ingest;
pub mod listener;
pub mod platform;
pub mod queue;
pub mod reconcile;
pub mod relay;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use {
    counters::{CounterSnapshot, Counters, SkipReason},
    error::{Error, Result},
    platform::{
        ChatMetadata, ErrorScope, Event, EventHandle, EventKind, EventStream, Identity, Platform,
        PlatformError, PlatformResult, ProtocolFault,
    },
    relay::run_cycle,
    supervisor::{ConfigSource, Supervisor},
};
