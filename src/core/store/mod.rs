mod cursors;
mod instructions;
mod ledger;
mod tasks;
pub mod types;

pub use cursors::{CursorStore, InMemoryCursorStore, SqliteCursorStore};

use anyhow::Result;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

/// Owns the sqlite connection backing every durable table: tasks,
/// instructions, the thank-you ledger, poller cursors, and credentials.
/// Domain operations live in the submodule `impl` blocks.
pub struct Storage {
    db: Arc<Mutex<Connection>>,
    data_dir: PathBuf,
}

impl Storage {
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.exists() {
            fs::create_dir_all(&data_dir).await?;
        }

        let db = Connection::open(data_dir.join("steward.db"))?;
        Self::create_tables(&db)?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            data_dir,
        })
    }

    /// In-memory storage for tests.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::create_tables(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            data_dir: PathBuf::from(":memory:"),
        })
    }

    fn create_tables(db: &Connection) -> Result<()> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL,
                result TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_status_created ON tasks(status, created_at)",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS instructions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                instruction TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                priority INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_instructions_user ON instructions(user_id, is_active)",
            [],
        )?;

        // Authoritative at-most-once guard for the contact poller's
        // side-effecting action. The uniqueness constraint is the invariant.
        db.execute(
            "CREATE TABLE IF NOT EXISTS thank_you_ledger (
                user_id TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                email_address TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                UNIQUE(user_id, contact_id)
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS poller_cursors (
                poller TEXT NOT NULL,
                user_id TEXT NOT NULL,
                last_seen_id TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY(poller, user_id)
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS credentials (
                user_id TEXT NOT NULL,
                service TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at INTEGER,
                UNIQUE(user_id, service)
            )",
            [],
        )?;

        Ok(())
    }

    pub fn get_db(&self) -> Arc<Mutex<Connection>> {
        self.db.clone()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
