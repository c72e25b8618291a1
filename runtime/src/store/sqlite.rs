//! SQLite-backed key-value store.

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Mutex;

use super::StateStore;
use crate::error::{GeomaskError, Result};

/// Durable store: one row per key, JSON-encoded value.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GeomaskError::Storage(format!("{}: {e}", parent.display())))?;
        }
        let db = Connection::open(path)?;
        Self::init(db)
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn with_db<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self
            .db
            .lock()
            .map_err(|_| GeomaskError::Storage("store lock poisoned".into()))?;
        f(&db)
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.with_db(|db| {
            let mut stmt = db.prepare("SELECT value FROM kv WHERE key = ?1")?;
            let result = stmt.query_row(rusqlite::params![key], |row| row.get::<_, String>(0));
            match result {
                Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let raw = serde_json::to_string(&value)?;
        self.with_db(|db| {
            db.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, raw],
            )?;
            Ok(())
        })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.with_db(|db| {
            db.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
            Ok(())
        })
    }

    async fn snapshot(&self) -> Result<Map<String, Value>> {
        self.with_db(|db| {
            let mut stmt = db.prepare("SELECT key, value FROM kv ORDER BY key")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let mut map = Map::new();
            for (key, raw) in rows {
                map.insert(key, serde_json::from_str(&raw)?);
            }
            Ok(map)
        })
    }
}
