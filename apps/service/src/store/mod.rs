//! Durable key-value store abstraction.
//!
//! The whole monitor state lives under a single key and is read-modified-
//! written once per cycle. Writes are last-writer-wins; the deployment
//! model runs one cycle at a time, so no conditional put is attempted. If
//! concurrent cycles ever become possible, swap in a backend that does a
//! versioned compare-and-swap behind this same trait.

pub mod libsql;

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

pub use self::libsql::LibsqlStore;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a JSON value, `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Write a JSON value, replacing any previous one.
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<()>;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.lock().expect("store poisoned").get(key).cloned())
    }

    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.entries.lock().expect("store poisoned").insert(key.to_string(), value.clone());
        Ok(())
    }
}
