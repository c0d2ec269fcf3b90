//! Durable per-source cursors: the id of the last event delivered from each
//! source channel.
//!
//! Every write is a max-upsert, so a cursor never moves backwards no matter how
//! many writers race on it.

pub mod error;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;

pub use {
    error::{Error, Result},
    store::{CursorRecord, CursorStore},
    store_memory::InMemoryCursorStore,
    store_sqlite::SqliteCursorStore,
};

/// Run database migrations for the cursor tables.
///
/// Creates `forward_cursors`. Called by [`SqliteCursorStore::new`]; call it
/// yourself before [`SqliteCursorStore::with_pool`] on a shared pool.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
