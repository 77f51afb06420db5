// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Crash-resilient key-value storage for the encoded page collection.
//
// The session only needs string get/put/remove. `SqliteStateStore` is the
// durable back-end (WAL journal, every write committed before returning);
// `MemoryStateStore` serves tests and throwaway sessions.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use pagestack_core::error::{PipelineError, Result};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use crate::codec::EncodedPages;

pub const KEY_URIS: &str = "pages.uris";
pub const KEY_IDS: &str = "pages.ids";
pub const KEY_ROTATIONS: &str = "pages.rotations";
pub const KEY_METADATA: &str = "pages.metadata";
pub const KEY_SOURCES: &str = "pages.sources";

/// A string key-value store that survives process death.
pub trait StateStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn put(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Apply several puts (`Some`) and removals (`None`) together.
    ///
    /// Back-ends that can do so apply them atomically.
    fn apply(&self, changes: &[(&str, Option<&str>)]) -> Result<()> {
        for (key, value) in changes {
            match value {
                Some(value) => self.put(key, value)?,
                None => self.remove(key)?,
            }
        }
        Ok(())
    }
}

/// Write the encoded collection. Absent strings remove their key.
pub fn write_pages(store: &dyn StateStore, encoded: &EncodedPages) -> Result<()> {
    store.apply(&[
        (KEY_URIS, encoded.uris.as_deref()),
        (KEY_IDS, encoded.ids.as_deref()),
        (KEY_ROTATIONS, encoded.rotations.as_deref()),
        (KEY_METADATA, encoded.metadata.as_deref()),
        (KEY_SOURCES, encoded.sources.as_deref()),
    ])
}

/// Read back whatever was last written by [`write_pages`].
pub fn read_pages(store: &dyn StateStore) -> Result<EncodedPages> {
    Ok(EncodedPages {
        uris: store.get(KEY_URIS)?,
        ids: store.get(KEY_IDS)?,
        rotations: store.get(KEY_ROTATIONS)?,
        metadata: store.get(KEY_METADATA)?,
        sources: store.get(KEY_SOURCES)?,
    })
}

// ---------------------------------------------------------------------------
// SQLite back-end
// ---------------------------------------------------------------------------

/// SQLite schema for the key-value table.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS kv_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
"#;

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> PipelineError + '_ {
    move |e| PipelineError::Database(format!("{context}: {e}"))
}

/// Durable store backed by a single SQLite table.
///
/// All methods are synchronous because `rusqlite` does not support async
/// natively. Writes are small (a few KB at most for a full session).
pub struct SqliteStateStore {
    conn: Connection,
}

impl SqliteStateStore {
    /// Open (or create) the store at `path`.
    ///
    /// WAL journal mode keeps the last committed state intact across unclean
    /// shutdowns.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;
        info!("session state database opened");
        Ok(Self { conn })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;
        debug!("in-memory session state database opened");
        Ok(Self { conn })
    }

    /// When `key` was last written, as RFC 3339.
    pub fn updated_at(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT updated_at FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("select updated_at"))
    }

    fn put_on(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )
        .map_err(db_err("upsert"))?;
        Ok(())
    }

    fn remove_on(conn: &Connection, key: &str) -> Result<()> {
        conn.execute("DELETE FROM kv_state WHERE key = ?1", params![key])
            .map_err(db_err("delete"))?;
        Ok(())
    }
}

impl StateStore for SqliteStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("select"))
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        Self::put_on(&self.conn, key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        Self::remove_on(&self.conn, key)
    }

    fn apply(&self, changes: &[(&str, Option<&str>)]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(db_err("begin"))?;
        for (key, value) in changes {
            match value {
                Some(value) => Self::put_on(&tx, key, value)?,
                None => Self::remove_on(&tx, key)?,
            }
        }
        tx.commit().map_err(db_err("commit"))?;
        debug!(changes = changes.len(), "session state committed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory back-end
// ---------------------------------------------------------------------------

/// Non-durable store. Clones share the same map, so a test can keep a handle
/// while the session owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    map: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.map
            .lock()
            .map_err(|_| PipelineError::Database("memory store lock poisoned".into()))
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
