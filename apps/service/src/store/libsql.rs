//! libsql-backed key-value store: one `kv` table, pooled connections.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use libsql::params;

use crate::pool::{LibsqlManager, LibsqlPool};

use super::KvStore;

pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    /// Open (or create) a local database file and bootstrap the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let database = libsql::Builder::new_local(path.as_ref()).build().await?;
        let pool = LibsqlPool::builder(LibsqlManager::new(database)).build()?;

        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            (),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for LibsqlStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.pool.get().await?;
        let mut rows = conn.query("SELECT value FROM kv WHERE key = ?", params![key]).await?;

        match rows.next().await? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.pool.get().await?;
        let raw = serde_json::to_string(value)?;
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                 updated_at = excluded.updated_at",
            params![key, raw, now],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_libsql_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LibsqlStore::open(dir.path().join("kv.db")).await.unwrap();

        assert!(store.get("state").await.unwrap().is_none());

        let value = serde_json::json!({ "overall_up": 3, "incident": {} });
        store.put("state", &value).await.unwrap();
        assert_eq!(store.get("state").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn test_libsql_store_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = LibsqlStore::open(dir.path().join("kv.db")).await.unwrap();

        store.put("state", &serde_json::json!({ "v": 1 })).await.unwrap();
        store.put("state", &serde_json::json!({ "v": 2 })).await.unwrap();
        assert_eq!(store.get("state").await.unwrap(), Some(serde_json::json!({ "v": 2 })));
    }

    #[tokio::test]
    async fn test_libsql_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");

        {
            let store = LibsqlStore::open(&path).await.unwrap();
            store.put("state", &serde_json::json!({ "v": 7 })).await.unwrap();
        }

        let store = LibsqlStore::open(&path).await.unwrap();
        assert_eq!(store.get("state").await.unwrap(), Some(serde_json::json!({ "v": 7 })));
    }
}
