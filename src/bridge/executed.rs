//! Durable record of outgoing messages that are known to be executed.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::Result;

/// Minimal durable key/value map
#[async_trait]
pub(crate) trait KeyValueStore: Send + Sync + Debug {
    async fn get(&self, key: &str) -> Result<Option<bool>>;

    /// Stores `value` under `key`. An existing entry is never overwritten.
    async fn set(&self, key: &str, value: bool) -> Result<()>;

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Initialize the SQLite connection pool.
pub(crate) async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Runs the embedded migrations.
pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(sqlx::Error::from)?;
    Ok(())
}

/// Row of the `executed_messages` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ExecutedMessageRecord {
    /// `{child_chain_id}:{unique_id}`
    pub(crate) cache_key: String,
    pub(crate) executed: bool,
    /// Insertion time
    pub(crate) recorded_at: NaiveDateTime,
}

/// SQLite backed [`KeyValueStore`]; every write is committed before returning
#[derive(Debug, Clone)]
pub(crate) struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<bool>> {
        let record = sqlx::query_as::<_, ExecutedMessageRecord>(
            r#"
            SELECT cache_key, executed, recorded_at
            FROM executed_messages
            WHERE cache_key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|r| r.executed))
    }

    async fn set(&self, key: &str, value: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO executed_messages (cache_key, executed)
            VALUES (?1, ?2)
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Process-local [`KeyValueStore`]
#[derive(Debug, Default)]
pub(crate) struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, bool>>,
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<bool>> {
        Ok(self.entries.read().await.get(key).copied())
    }

    async fn set(&self, key: &str, value: bool) -> Result<()> {
        self.entries
            .write()
            .await
            .entry(key.to_string())
            .or_insert(value);
        Ok(())
    }
}

/// Set of executed message ids for one child chain
///
/// Membership is monotonic; entries are never removed.
#[derive(Debug, Clone)]
pub(crate) struct ExecutedMessagesCache {
    store: Arc<dyn KeyValueStore>,
    child_chain_id: u64,
}

impl ExecutedMessagesCache {
    pub(crate) fn new(store: Arc<dyn KeyValueStore>, child_chain_id: u64) -> Self {
        info!(child_chain_id, "Executed messages cache opened");
        Self {
            store,
            child_chain_id,
        }
    }

    fn key(&self, unique_id: &str) -> String {
        format!("{}:{unique_id}", self.child_chain_id)
    }

    pub(crate) async fn contains(&self, unique_id: &str) -> Result<bool> {
        Ok(self.store.get(&self.key(unique_id)).await? == Some(true))
    }

    pub(crate) async fn add(&self, unique_id: &str) -> Result<()> {
        self.store.set(&self.key(unique_id), true).await?;
        debug!(unique_id, "Marked message executed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sqlite_store() -> SqliteKeyValueStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteKeyValueStore::new(pool)
    }

    #[tokio::test]
    async fn test_sqlite_store_is_monotonic() {
        let store = sqlite_store().await;

        assert_eq!(store.get("42161:nitro-5").await.unwrap(), None);
        store.set("42161:nitro-5", true).await.unwrap();
        // an existing entry is never overwritten
        store.set("42161:nitro-5", false).await.unwrap();

        assert_eq!(store.get("42161:nitro-5").await.unwrap(), Some(true));
        assert!(store.has("42161:nitro-5").await.unwrap());
        assert!(!store.has("42161:nitro-6").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_is_monotonic() {
        let store = MemoryKeyValueStore::default();

        store.set("k", true).await.unwrap();
        store.set("k", false).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_cache_is_namespaced_by_child_chain() {
        let store: Arc<dyn KeyValueStore> = Arc::new(sqlite_store().await);
        let arbitrum = ExecutedMessagesCache::new(Arc::clone(&store), 42161);
        let nova = ExecutedMessagesCache::new(Arc::clone(&store), 42170);

        arbitrum.add("classic-5-2").await.unwrap();

        assert!(arbitrum.contains("classic-5-2").await.unwrap());
        assert!(!nova.contains("classic-5-2").await.unwrap());
        assert!(store.has("42161:classic-5-2").await.unwrap());
    }
}
