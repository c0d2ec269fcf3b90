//! SQLite-backed cursor store using sqlx.

use {
    async_trait::async_trait,
    chanrelay_common::{EventId, UNSET_EVENT_ID},
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
    tracing::debug,
};

use crate::{
    Error, Result,
    error::Context,
    store::{CursorRecord, CursorStore, now_ms},
};

/// SQLite persistence for forwarding cursors.
pub struct SqliteCursorStore {
    pool: SqlitePool,
}

impl SqliteCursorStore {
    /// Connect with a dedicated pool and run migrations.
    ///
    /// For shared pools use [`SqliteCursorStore::with_pool`] after calling
    /// [`crate::run_migrations`].
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to open cursor database {database_url}"))?;

        crate::run_migrations(&pool).await?;
        debug!(database_url, "cursor store ready");

        Ok(Self { pool })
    }

    /// Wrap an existing pool (migrations must already be applied).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn to_event_id(source: &str, raw: i64) -> Result<EventId> {
    EventId::try_from(raw).map_err(|_| Error::corrupt(source, raw))
}

fn to_sql(event_id: EventId) -> Result<i64> {
    i64::try_from(event_id).map_err(|_| Error::message(format!("event id {event_id} out of range")))
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn get(&self, source: &str) -> Result<EventId> {
        let row = sqlx::query("SELECT last_event_id FROM forward_cursors WHERE source = ?")
            .bind(source)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => to_event_id(source, row.get("last_event_id")),
            None => Ok(UNSET_EVENT_ID),
        }
    }

    async fn set(&self, source: &str, event_id: EventId) -> Result<EventId> {
        let row = sqlx::query(
            "INSERT INTO forward_cursors (source, last_event_id, updated_at_ms) VALUES (?, ?, ?)
             ON CONFLICT(source) DO UPDATE SET
                 updated_at_ms = CASE WHEN excluded.last_event_id > last_event_id
                                      THEN excluded.updated_at_ms ELSE updated_at_ms END,
                 last_event_id = MAX(last_event_id, excluded.last_event_id)
             RETURNING last_event_id",
        )
        .bind(source)
        .bind(to_sql(event_id)?)
        .bind(now_ms() as i64)
        .fetch_one(&self.pool)
        .await?;
        to_event_id(source, row.get("last_event_id"))
    }

    async fn list(&self) -> Result<Vec<CursorRecord>> {
        let rows = sqlx::query(
            "SELECT source, last_event_id, updated_at_ms FROM forward_cursors ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let source: String = row.get("source");
            let last_event_id = to_event_id(&source, row.get("last_event_id"))?;
            records.push(CursorRecord {
                source,
                last_event_id,
                updated_at_ms: row.get::<i64, _>("updated_at_ms") as u64,
            });
        }
        Ok(records)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn make_store() -> SqliteCursorStore {
        SqliteCursorStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_absent_is_unset() {
        let store = make_store().await;
        assert_eq!(store.get("-100").await.unwrap(), UNSET_EVENT_ID);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_max_upsert() {
        let store = make_store().await;
        assert_eq!(store.set("-100", 5).await.unwrap(), 5);
        assert_eq!(store.set("-100", 3).await.unwrap(), 5);
        assert_eq!(store.set("-100", 9).await.unwrap(), 9);
        assert_eq!(store.get("-100").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_sqlite_sources_are_independent() {
        let store = make_store().await;
        store.set("@a", 3).await.unwrap();
        store.set("@b", 8).await.unwrap();
        let rows = store.list().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].source, "@a");
        assert_eq!(rows[0].last_event_id, 3);
        assert_eq!(rows[1].last_event_id, 8);
    }

    #[tokio::test]
    async fn test_sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("cursors.db").display());
        {
            let store = SqliteCursorStore::new(&url).await.unwrap();
            store.set("-100", 42).await.unwrap();
        }
        let store = SqliteCursorStore::new(&url).await.unwrap();
        assert_eq!(store.get("-100").await.unwrap(), 42);
    }
}
