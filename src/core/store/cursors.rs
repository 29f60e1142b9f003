use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::Storage;

/// Low-water marks for the pollers, keyed by poller name and user. Injected
/// as a dependency so restart-safety is a configuration choice: the sqlite
/// backing survives restarts, the in-memory one is for tests and for
/// deployments that accept re-evaluating history after a restart.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn last_seen(&self, poller: &str, user_id: &str) -> Result<Option<String>>;
    async fn advance(&self, poller: &str, user_id: &str, id: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryCursorStore {
    marks: Mutex<HashMap<(String, String), String>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn last_seen(&self, poller: &str, user_id: &str) -> Result<Option<String>> {
        let marks = self.marks.lock().await;
        Ok(marks.get(&(poller.to_string(), user_id.to_string())).cloned())
    }

    async fn advance(&self, poller: &str, user_id: &str, id: &str) -> Result<()> {
        let mut marks = self.marks.lock().await;
        marks.insert((poller.to_string(), user_id.to_string()), id.to_string());
        Ok(())
    }
}

pub struct SqliteCursorStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteCursorStore {
    pub fn new(storage: &Storage) -> Self {
        Self { db: storage.get_db() }
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn last_seen(&self, poller: &str, user_id: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT last_seen_id FROM poller_cursors WHERE poller = ?1 AND user_id = ?2",
        )?;
        let mut rows = stmt.query(params![poller, user_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn advance(&self, poller: &str, user_id: &str, id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO poller_cursors (poller, user_id, last_seen_id, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(poller, user_id) DO UPDATE SET
                 last_seen_id = excluded.last_seen_id,
                 updated_at = excluded.updated_at",
            params![poller, user_id, id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}
