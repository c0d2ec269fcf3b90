//! Shared identifiers and error helpers used across all chanrelay crates.

pub mod error;
pub mod types;

pub use {
    error::{Error, FromMessage, Result},
    types::{ChannelRef, EventId, SourceChannel, TargetChannel, UNSET_EVENT_ID},
};
