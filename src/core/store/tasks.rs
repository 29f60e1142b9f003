use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;

use super::Storage;
use super::types::{Task, TaskStatus, TaskType};

struct RawTask {
    id: String,
    user_id: String,
    task_type: String,
    status: String,
    data: String,
    result: Option<String>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTask> {
    Ok(RawTask {
        id: row.get(0)?,
        user_id: row.get(1)?,
        task_type: row.get(2)?,
        status: row.get(3)?,
        data: row.get(4)?,
        result: row.get(5)?,
        error_message: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("bad timestamp in tasks table: {}", value))?
        .with_timezone(&Utc))
}

impl TryFrom<RawTask> for Task {
    type Error = anyhow::Error;

    fn try_from(raw: RawTask) -> Result<Self> {
        Ok(Task {
            task_type: TaskType::from_kind(&raw.task_type)
                .with_context(|| format!("unknown task type: {}", raw.task_type))?,
            status: TaskStatus::from_status(&raw.status)
                .with_context(|| format!("unknown task status: {}", raw.status))?,
            data: serde_json::from_str(&raw.data)?,
            created_at: parse_ts(&raw.created_at)?,
            updated_at: parse_ts(&raw.updated_at)?,
            id: raw.id,
            user_id: raw.user_id,
            result: raw.result,
            error_message: raw.error_message,
        })
    }
}

const TASK_COLUMNS: &str =
    "id, user_id, task_type, status, data, result, error_message, created_at, updated_at";

impl Storage {
    pub async fn insert_task(
        &self,
        user_id: &str,
        task_type: TaskType,
        data: &serde_json::Value,
        status: TaskStatus,
    ) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            task_type,
            status,
            data: data.clone(),
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO tasks (id, user_id, task_type, status, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.id,
                task.user_id,
                task.task_type.as_str(),
                task.status.as_str(),
                serde_json::to_string(&task.data)?,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS))?;
        let mut rows = stmt.query_map(params![id], map_row)?;
        match rows.next() {
            Some(raw) => Ok(Some(raw?.try_into()?)),
            None => Ok(None),
        }
    }

    pub async fn list_tasks_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Task>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM tasks WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id, limit as i64], map_row)?;

        let mut tasks = Vec::new();
        for raw in rows {
            tasks.push(raw?.try_into()?);
        }
        Ok(tasks)
    }

    pub async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM tasks WHERE status = ?1 ORDER BY created_at ASC",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![status.as_str()], map_row)?;

        let mut tasks = Vec::new();
        for raw in rows {
            tasks.push(raw?.try_into()?);
        }
        Ok(tasks)
    }

    /// Claim up to `limit` oldest pending tasks, flipping each to
    /// `in_progress`. The flip is a compare-and-set on the current status, so
    /// a task claimed by a concurrent processor between the select and the
    /// update is skipped rather than double-claimed.
    pub async fn claim_pending_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM tasks WHERE status = 'pending' ORDER BY created_at ASC LIMIT ?1",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], map_row)?;

        let mut candidates = Vec::new();
        for raw in rows {
            candidates.push(raw?);
        }
        drop(stmt);

        let mut claimed = Vec::new();
        for raw in candidates {
            let updated = db.execute(
                "UPDATE tasks SET status = 'in_progress', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![Utc::now().to_rfc3339(), raw.id],
            )?;
            if updated == 1 {
                let mut task: Task = raw.try_into()?;
                task.status = TaskStatus::InProgress;
                claimed.push(task);
            }
        }
        Ok(claimed)
    }

    pub async fn complete_task(&self, id: &str, result: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE tasks SET status = 'completed', result = ?1, updated_at = ?2 WHERE id = ?3",
            params![result, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub async fn fail_task(&self, id: &str, error_message: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE tasks SET status = 'failed', error_message = ?1, updated_at = ?2 WHERE id = ?3",
            params![error_message, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub async fn update_task_data(&self, id: &str, data: &serde_json::Value) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE tasks SET data = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(data)?, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub async fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Retention cleanup, the only path that ever deletes tasks. Pending and
    /// parked tasks are never purged.
    pub async fn purge_terminal_tasks(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - chrono::Duration::days(older_than_days)).to_rfc3339();
        let db = self.db.lock().await;
        let deleted = db.execute(
            "DELETE FROM tasks WHERE status IN ('completed', 'failed') AND updated_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }
}
