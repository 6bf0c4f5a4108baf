use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::poller::PollUpdate;

const HISTORY_KEY: &str = "history";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("history blob could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("history directory unavailable: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub task_id: String,
    pub query: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// `task_id -> entry`, persisted as a single blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryHistory {
    entries: BTreeMap<String, HistoryEntry>,
}

impl QueryHistory {
    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<&HistoryEntry> {
        self.entries.get(task_id)
    }

    /// Inserts the entry unless its task id is already present.
    pub fn insert_once(&mut self, entry: HistoryEntry) -> bool {
        if self.contains(&entry.task_id) {
            return false;
        }
        self.entries.insert(entry.task_id.clone(), entry);
        true
    }

    pub fn remove(&mut self, task_id: &str) -> Option<HistoryEntry> {
        self.entries.remove(task_id)
    }

    pub fn newest_first(&self) -> Vec<&HistoryEntry> {
        let mut entries: Vec<&HistoryEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.task_id.cmp(&b.task_id)));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Client-local persistence of the query history. Reads and writes move the
/// whole map at once.
pub trait HistoryStore: Send {
    fn load(&self) -> Result<QueryHistory, HistoryError>;
    fn save(&self, history: &QueryHistory) -> Result<(), HistoryError>;
}

/// Records a finished task. Returns `true` only for the first write of a task id.
pub fn record_completion(
    store: &dyn HistoryStore,
    task_id: &str,
    query: &str,
    now: DateTime<Utc>,
) -> Result<bool, HistoryError> {
    let mut history = store.load()?;
    let inserted = history.insert_once(HistoryEntry {
        task_id: task_id.to_string(),
        query: query.to_string(),
        timestamp: now.timestamp_millis(),
    });
    if inserted {
        store.save(&history)?;
        debug!(task_id, "history entry recorded");
    }
    Ok(inserted)
}

/// History side of a poll update: only the first `Done` of a task writes an
/// entry. `fallback_query` is used when the backend did not echo the query.
/// Returns the entry that was written, if any.
pub fn apply_poll_update(
    store: &dyn HistoryStore,
    update: &PollUpdate,
    fallback_query: &str,
    now: DateTime<Utc>,
) -> Result<Option<HistoryEntry>, HistoryError> {
    let PollUpdate::Done(finished) = update else {
        return Ok(None);
    };
    let query = finished
        .query
        .as_deref()
        .filter(|q| !q.is_empty())
        .unwrap_or(fallback_query);
    if !record_completion(store, &finished.task_id, query, now)? {
        return Ok(None);
    }
    Ok(store.load()?.get(&finished.task_id).cloned())
}

pub fn delete_entry(store: &dyn HistoryStore, task_id: &str) -> Result<bool, HistoryError> {
    let mut history = store.load()?;
    if history.remove(task_id).is_none() {
        return Ok(false);
    }
    store.save(&history)?;
    Ok(true)
}

/// Keeps the history blob in a one-row key/value table.
pub struct SqliteHistoryStore {
    path: PathBuf,
}

impl SqliteHistoryStore {
    pub fn open_default() -> Result<Self, HistoryError> {
        Self::open(Config::get_config_dir().join("history.sqlite"))
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let store = SqliteHistoryStore { path };
        let conn = store.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, HistoryError> {
        Ok(Connection::open(&self.path)?)
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn load(&self) -> Result<QueryHistory, HistoryError> {
        let conn = self.connect()?;
        let blob: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![HISTORY_KEY], |row| row.get(0))
            .optional()?;
        let Some(blob) = blob else {
            return Ok(QueryHistory::default());
        };
        match serde_json::from_str(&blob) {
            Ok(history) => Ok(history),
            Err(e) => {
                warn!(error = %e, "history blob is unreadable, starting empty");
                Ok(QueryHistory::default())
            }
        }
    }

    fn save(&self, history: &QueryHistory) -> Result<(), HistoryError> {
        let blob = serde_json::to_string(history)?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![HISTORY_KEY, blob],
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub use memory::MemoryHistoryStore;

#[cfg(test)]
mod memory {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory blob store that counts writes.
    #[derive(Default)]
    pub struct MemoryHistoryStore {
        blob: Mutex<Option<String>>,
        writes: AtomicUsize,
    }

    impl MemoryHistoryStore {
        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl HistoryStore for MemoryHistoryStore {
        fn load(&self) -> Result<QueryHistory, HistoryError> {
            let blob = self.blob.lock().unwrap().clone();
            match blob {
                Some(blob) => Ok(serde_json::from_str(&blob)?),
                None => Ok(QueryHistory::default()),
            }
        }

        fn save(&self, history: &QueryHistory) -> Result<(), HistoryError> {
            *self.blob.lock().unwrap() = Some(serde_json::to_string(history)?);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
