//! One connect → catch-up + listen + deliver → disconnect cycle.

use std::sync::Arc;

use {
    chanrelay_common::{SourceChannel, TargetChannel},
    chanrelay_config::RelayConfig,
    chanrelay_cursor::CursorStore,
    tokio::task::JoinSet,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{
    counters::Counters,
    error::{Context, Error, Result},
    ingest::IngestGate,
    listener::Listener,
    platform::Platform,
    queue,
    reconcile::{CatchUpPolicy, Reconciler},
    worker::{DeliveryPolicy, Worker},
};

/// Run the pipeline against one config snapshot until `cancel` fires or a
/// cycle-ending error occurs.
///
/// Returns `Ok(())` only on cancellation. Items still queued at that point
/// are dropped; the next cycle's catch-up finds them again from the cursors.
pub async fn run_cycle(
    platform: Arc<dyn Platform>,
    store: Arc<dyn CursorStore>,
    counters: Arc<Counters>,
    config: &RelayConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let target = config.target.clone().context("no target channel configured")?;
    let sources = cycle_sources(config);
    if sources.is_empty() {
        return Err(Error::config("no source channels configured"));
    }

    let identity = platform.connect().await?;
    info!(%identity, "connected");

    match platform.chat_metadata(&target).await {
        Ok(meta) => info!(
            target = %target,
            title = meta.title.as_deref().unwrap_or(""),
            accessible = meta.accessible,
            "target channel"
        ),
        Err(e) => warn!(target = %target, error = %e, "could not inspect target channel"),
    }

    let cycle = cancel.child_token();
    let result = run_pipeline(&platform, store, counters, config, target, sources, &cycle).await;
    cycle.cancel();

    if let Err(e) = platform.disconnect().await {
        warn!(error = %e, "disconnect failed");
    }
    result
}

async fn run_pipeline(
    platform: &Arc<dyn Platform>,
    store: Arc<dyn CursorStore>,
    counters: Arc<Counters>,
    config: &RelayConfig,
    target: TargetChannel,
    sources: Vec<SourceChannel>,
    cancel: &CancellationToken,
) -> Result<()> {
    let forwarding = &config.forwarding;
    let (tx, receivers) = queue::channel(forwarding.workers);
    let gate = Arc::new(IngestGate::new(
        tx,
        Arc::clone(&counters),
        Arc::clone(platform),
    ));
    for source in &sources {
        gate.begin_reconcile(source);
    }

    // Subscribe before catch-up so nothing falls between history and live.
    let events = platform.subscribe(&sources).await?;
    info!(
        sources = sources.len(),
        workers = receivers.len(),
        target = %target,
        "forwarding started"
    );

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    let listener = Listener::new(
        Arc::clone(&store),
        Arc::clone(&gate),
        Arc::clone(&counters),
    );
    tasks.spawn(listener.run(events, cancel.clone()));

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(platform),
        Arc::clone(&store),
        Arc::clone(&gate),
        CatchUpPolicy::from(forwarding),
    ));
    let catch_up_cancel = cancel.clone();
    tasks.spawn(async move {
        reconciler.run_all(sources, catch_up_cancel).await?;
        Ok(())
    });

    let policy = DeliveryPolicy::from(forwarding);
    for (index, rx) in receivers.into_iter().enumerate() {
        let worker = Worker::new(
            index,
            rx,
            Arc::clone(platform),
            Arc::clone(&store),
            target.clone(),
            Arc::clone(&counters),
            policy,
            cancel.clone(),
        );
        tasks.spawn(worker.run());
    }
    drop(gate);

    loop {
        let joined = tokio::select! {
            () = cancel.cancelled() => break,
            joined = tasks.join_next() => joined,
        };
        let failure = match joined {
            None => break,
            Some(Ok(Ok(()))) => continue,
            Some(Ok(Err(e))) => e,
            Some(Err(e)) => e.into(),
        };
        // Tasks failing on their way down after shutdown was requested.
        if cancel.is_cancelled() {
            break;
        }
        cancel.cancel();
        tasks.shutdown().await;
        return Err(failure);
    }

    let pending = counters.snapshot();
    tasks.shutdown().await;
    info!(
        queued = pending.queued,
        forwarded = pending.forwarded,
        skipped = pending.skipped,
        "forwarding stopped"
    );
    Ok(())
}

/// Configured sources without duplicates and without the target itself.
fn cycle_sources(config: &RelayConfig) -> Vec<SourceChannel> {
    config
        .unique_sources()
        .into_iter()
        .filter(|source| {
            let loops = config.target.as_ref() == Some(source);
            if loops {
                warn!(source = %source, "target listed as a source, ignoring it");
            }
            !loops
        })
        .collect()
}
