//! Key-value storage capability.
//!
//! The store treats its persistence engine as a capability: get/set/delete/
//! multi-get over byte-string keys. [`SqliteKv`] is the on-disk engine
//! (WAL-mode SQLite, one `kv` table); [`MemoryKv`] backs unit tests.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Byte-string key-value operations the store relies on.
pub trait Kv: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    /// Delete the given keys, returning how many existed.
    fn delete(&self, keys: &[String]) -> Result<usize>;
    /// Fetch many keys at once; missing keys yield `None` at their position.
    fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);
";

/// SQLite-backed key-value engine.
///
/// The connection sits behind a mutex because `rusqlite::Connection` is not
/// `Sync` and the store is shared across threads.
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    /// Open or create the database at `path`.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // Poisoned only if a holder panicked mid-query; the data is still
        // consistent for our single-statement usage.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Kv for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.lock()
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()
            .context("Failed to get key")
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.lock()
            .execute(
                "INSERT INTO kv (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .context("Failed to set key")?;
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result<usize> {
        let conn = self.lock();
        let mut removed = 0;
        for key in keys {
            removed += conn
                .execute("DELETE FROM kv WHERE key = ?", params![key])
                .context("Failed to delete key")?;
        }
        Ok(removed)
    }

    fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }
}

/// In-memory key-value engine for tests.
#[derive(Default)]
pub struct MemoryKv {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Kv for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.map.lock().unwrap().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut map = self.map.lock().unwrap();
        Ok(keys.iter().filter(|key| map.remove(*key).is_some()).count())
    }

    fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let map = self.map.lock().unwrap();
        Ok(keys.iter().map(|key| map.get(key).cloned()).collect())
    }
}
