//! Telegram Bot API adapter.
//!
//! [`TelegramPlatform`] implements the forwarding pipeline's
//! [`Platform`](chanrelay_forward::Platform) port with teloxide: channel posts
//! arrive by long polling and are relayed with `copyMessage`. The Bot API
//! cannot read channel history, so catch-up is reported as unsupported and
//! only live posts are relayed.

pub mod classify;
pub mod error;
mod ledger;
pub mod platform;
mod polling;

pub use {
    classify::classify,
    error::{Error, Result},
    platform::TelegramPlatform,
};
