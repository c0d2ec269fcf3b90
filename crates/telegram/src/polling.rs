//! Long-polling `getUpdates` loop feeding the live event stream.

use std::time::Duration;

use {
    chanrelay_common::SourceChannel,
    chanrelay_forward::{ErrorScope, Event, EventHandle, EventKind, PlatformError, PlatformResult},
    teloxide::{
        prelude::*,
        types::{AllowedUpdate, MessageKind, UpdateKind},
    },
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{classify::classify, ledger::SharedLedger};

const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Pause after a response that only repeated unsettled updates.
const PENDING_DELAY: Duration = Duration::from_secs(1);

/// Poll until `cancel` fires, the receiver goes away, or the connection dies.
///
/// Updates are confirmed only once `ledger` has them settled, so the server
/// keeps resending a post until its event is delivered or skipped.
pub(crate) async fn poll(
    bot: Bot,
    sources: Vec<SourceChannel>,
    poll_timeout_secs: u32,
    ledger: SharedLedger,
    tx: mpsc::Sender<PlatformResult<Event>>,
    cancel: CancellationToken,
) {
    let generation = ledger.lock().begin();
    info!(sources = sources.len(), generation, "telegram polling started");

    'poll: loop {
        let offset = ledger.lock().offset();
        let request = bot
            .get_updates()
            .offset(offset)
            .timeout(poll_timeout_secs)
            .allowed_updates(vec![AllowedUpdate::ChannelPost])
            .send();

        let result = tokio::select! {
            () = cancel.cancelled() => break,
            () = tx.closed() => break,
            result = request => result,
        };

        let delay = match result {
            Ok(updates) => {
                debug!(count = updates.len(), offset, "got telegram updates");
                let mut recorded = 0usize;
                for update in &updates {
                    let event = match &update.kind {
                        UpdateKind::ChannelPost(msg) => {
                            let event = channel_event(&sources, msg);
                            if event.is_none() {
                                debug!(chat_id = msg.chat.id.0, "post from unwatched chat ignored");
                            }
                            event
                        },
                        _ => None,
                    };
                    let handle = event.as_ref().map(|e| e.handle.clone());
                    if !ledger.lock().record(generation, update.id.0, handle) {
                        continue;
                    }
                    recorded += 1;
                    let Some(event) = event else {
                        continue;
                    };
                    if tx.send(Ok(event)).await.is_err() {
                        break 'poll;
                    }
                }
                if updates.is_empty() || recorded > 0 {
                    continue;
                }
                PENDING_DELAY
            },
            Err(e) => {
                let classified = classify(&e);
                if classified.scope() == ErrorScope::Connection {
                    warn!(error = %e, "telegram polling aborted");
                    let _ = tx.send(Err(classified)).await;
                    break;
                }
                let delay = match classified {
                    PlatformError::RateLimited { retry_after } => retry_after,
                    _ => RETRY_DELAY,
                };
                warn!(error = %e, retry_in_secs = delay.as_secs(), "telegram getUpdates failed");
                delay
            },
        };
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {},
        }
    }
    info!("telegram polling stopped");
}

/// The event for a channel post, if it comes from one of `sources`.
pub(crate) fn channel_event(sources: &[SourceChannel], msg: &Message) -> Option<Event> {
    let chat_id = msg.chat.id.0;
    let source = sources
        .iter()
        .find(|s| s.matches(chat_id, msg.chat.username()))?;
    let id = u64::try_from(msg.id.0).ok()?;
    let kind = match msg.kind {
        MessageKind::Common(_) => EventKind::Content,
        _ => EventKind::Service,
    };
    Some(Event {
        source: source.clone(),
        id,
        kind,
        handle: EventHandle {
            chat_id,
            event_id: id,
        },
    })
}
