//! Durable key-value persistence port
//!
//! The quota engine stores its counters through this trait so it can run
//! against an in-memory fake in tests and SQLite in the app. Reads and
//! writes are synchronous and process-local; they must stay near-instant
//! because the quota engine calls them on every consume and refill check.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection};
use tracing::debug;

use crate::billing::error::StoreError;

/// Synchronous key-value persistence surface
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// SQLite-backed store at `~/.config/borealis/quota.db`
///
/// Keys are namespaced per installation by an optional prefix so multiple
/// profiles can share one database file.
pub struct SqliteStore {
    conn: Connection,
    namespace: Option<String>,
}

impl SqliteStore {
    /// Create or open the store at the default config location
    pub fn new() -> Result<Self, StoreError> {
        let db_path = Self::default_path()?;
        Self::open(&db_path)
    }

    /// Create or open the store at an explicit path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("failed to create config dir: {}", e)))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Open(format!("failed to open {}: {}", path.display(), e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
        )
        .map_err(|e| StoreError::Open(format!("failed to create kv table: {}", e)))?;

        Ok(Self {
            conn,
            namespace: None,
        })
    }

    /// Prefix all keys with an installation namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn default_path() -> Result<PathBuf, StoreError> {
        dirs::config_dir()
            .map(|d| d.join("borealis").join("quota.db"))
            .ok_or_else(|| StoreError::Open("could not determine config directory".to_string()))
    }

    fn full_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, key),
            None => key.to_string(),
        }
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let result = self.conn.query_row(
            "SELECT value FROM kv WHERE key = ?",
            params![self.full_key(key)],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get {} failed: {}", key, e))),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                r#"
                INSERT INTO kv (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = ?2
                "#,
                params![self.full_key(key), value],
            )
            .map_err(|e| StoreError::Query(format!("set {} failed: {}", key, e)))?;

        debug!(key = key, "Persisted key");
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?", params![self.full_key(key)])
            .map_err(|e| StoreError::Query(format!("remove {} failed: {}", key, e)))?;
        Ok(())
    }
}

/// In-memory fake for tests
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}
