//! Durable SQLite-backed key-value store.
//!
//! Expiry is stored as a unix-millisecond column; expired rows are deleted
//! lazily on read.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use super::KvStore;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| format!("failed to open store: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("Opened sqlite store at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory store (used by tests).
    pub fn open_in_memory() -> Result<Self, String> {
        let conn =
            Connection::open_in_memory().map_err(|e| format!("failed to open store: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), String> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            );
            "#,
        )
        .map_err(|e| format!("failed to init schema: {e}"))
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, String> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let row: Option<(String, Option<i64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM kv WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| format!("store read failed: {e}"))?;

        match row {
            Some((_, Some(expires_at))) if expires_at <= Self::now_ms() => {
                conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                    .map_err(|e| format!("store prune failed: {e}"))?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), String> {
        let expires_at = ttl.map(|d| Self::now_ms() + d.as_millis() as i64);
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, expires_at],
        )
        .map_err(|e| format!("store write failed: {e}"))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), String> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| format!("store delete failed: {e}"))?;
        Ok(())
    }
}
