use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result, bail},
    chanrelay_config::{ConfigLoader, Severity, resolve_store_url, validate},
    chanrelay_cursor::{CursorStore, SqliteCursorStore},
    chanrelay_forward::{Counters, Supervisor},
    chanrelay_metrics::{MetricsRecorderConfig, init_metrics},
    chanrelay_telegram::TelegramPlatform,
    tokio::sync::Notify,
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
};

use crate::http;

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let loader = ConfigLoader::new(config_path);
    let report = validate::validate(loader.path().as_deref());
    for d in &report.diagnostics {
        match d.severity {
            Severity::Error => error!(path = %d.path, category = d.category, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, category = d.category, "{}", d.message),
            Severity::Info => {},
        }
    }
    if report.has_errors() {
        bail!("configuration has errors; run `chanrelay check` for details");
    }

    let config = loader.load()?;
    let store_url = resolve_store_url(&config)?;
    let store: Arc<dyn CursorStore> = Arc::new(
        SqliteCursorStore::new(&store_url)
            .await
            .with_context(|| format!("failed to open cursor store {store_url}"))?,
    );
    info!(store = %store_url, "cursor store ready");

    let platform = Arc::new(TelegramPlatform::new(&config.telegram)?);
    let counters = Arc::new(Counters::new());
    let cancel = CancellationToken::new();

    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: vec![("service".into(), "chanrelay".into())],
    })?;
    if let Some(listen) = config.metrics.listen.as_deref().filter(|_| config.metrics.enabled) {
        let state = http::HttpState {
            metrics,
            counters: Arc::clone(&counters),
            store: Arc::clone(&store),
        };
        let listener = tokio::net::TcpListener::bind(listen)
            .await
            .with_context(|| format!("failed to bind metrics listener on {listen}"))?;
        info!(listen = %listener.local_addr()?, "metrics endpoint listening");
        tokio::spawn(http::serve(listener, state, cancel.clone()));
    }

    let mut supervisor = Supervisor::new(
        platform,
        store,
        Arc::new(loader),
        counters,
        cancel.clone(),
    );
    tokio::spawn(watch_signals(cancel.clone(), supervisor.reload_handle()));

    supervisor.run().await?;
    let totals = supervisor.counters().snapshot();
    info!(
        queued = totals.queued,
        forwarded = totals.forwarded,
        skipped = totals.skipped,
        "chanrelay stopped"
    );
    Ok(())
}

/// Ctrl-C and SIGTERM stop the relay; SIGHUP reloads the configuration.
async fn watch_signals(cancel: CancellationToken, reload: Arc<Notify>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (Ok(mut term), Ok(mut hup)) =
            (signal(SignalKind::terminate()), signal(SignalKind::hangup()))
        else {
            warn!("cannot install signal handlers, only Ctrl-C stops the relay");
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
            return;
        };
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = term.recv() => break,
                _ = hup.recv() => {
                    info!("SIGHUP received, reloading configuration");
                    reload.notify_one();
                },
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = reload;
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown requested");
    cancel.cancel();
}
