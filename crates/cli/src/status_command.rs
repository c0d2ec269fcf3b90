use std::path::PathBuf;

use {
    anyhow::{Context, Result},
    chanrelay_config::{ConfigLoader, resolve_store_url},
    chanrelay_cursor::{CursorStore, SqliteCursorStore},
    serde_json::json,
};

/// Read-only view of the configuration and stored cursors.
pub async fn status(config_path: Option<PathBuf>, as_json: bool) -> Result<()> {
    let config = ConfigLoader::new(config_path).load()?;
    let store_url = resolve_store_url(&config)?;
    let store = SqliteCursorStore::new(&store_url)
        .await
        .with_context(|| format!("failed to open cursor store {store_url}"))?;
    let cursors = store.list().await?;

    if as_json {
        let report = json!({
            "target": config.target,
            "sources": config.unique_sources(),
            "forwarding": config.forwarding,
            "store": store_url,
            "cursors": cursors,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match &config.target {
        Some(target) => println!("target:   {target}"),
        None => println!("target:   (not configured)"),
    }
    println!("store:    {store_url}");
    println!(
        "policy:   new sources {:?}, {} worker(s)",
        config.forwarding.new_source, config.forwarding.workers
    );
    println!("sources:");
    for source in config.unique_sources() {
        let cursor = cursors
            .iter()
            .find(|c| c.source == source.key())
            .map_or_else(|| "-".to_string(), |c| c.last_event_id.to_string());
        println!("  {source:<32} cursor {cursor}");
    }

    let orphaned: Vec<_> = cursors
        .iter()
        .filter(|c| !config.sources.iter().any(|s| s.key() == c.source))
        .collect();
    if !orphaned.is_empty() {
        println!("cursors of sources no longer configured:");
        for c in orphaned {
            println!("  {:<32} cursor {}", c.source, c.last_event_id);
        }
    }
    Ok(())
}
