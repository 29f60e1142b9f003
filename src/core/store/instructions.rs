use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::params;

use super::Storage;
use super::types::{Instruction, TriggerType};

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, bool, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_instruction(
    (id, user_id, instruction, trigger, is_active, priority): (String, String, String, String, bool, i64),
) -> Result<Instruction> {
    Ok(Instruction {
        trigger_type: TriggerType::from_trigger(&trigger)
            .with_context(|| format!("unknown trigger type: {}", trigger))?,
        id,
        user_id,
        instruction,
        is_active,
        priority,
    })
}

impl Storage {
    pub async fn add_instruction(
        &self,
        user_id: &str,
        instruction: &str,
        trigger_type: TriggerType,
        priority: i64,
    ) -> Result<Instruction> {
        let record = Instruction {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            instruction: instruction.to_string(),
            trigger_type,
            is_active: true,
            priority,
        };

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO instructions (id, user_id, instruction, trigger_type, is_active, priority, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
            params![
                record.id,
                record.user_id,
                record.instruction,
                record.trigger_type.as_str(),
                record.priority,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(record)
    }

    /// Active instructions for a user, highest priority first. Passing a
    /// trigger type narrows the set (the task-based trigger path); `None`
    /// returns every active instruction (the direct proactive path).
    pub async fn get_active_instructions(
        &self,
        user_id: &str,
        trigger_type: Option<TriggerType>,
    ) -> Result<Vec<Instruction>> {
        let db = self.db.lock().await;

        let mut results = Vec::new();
        if let Some(trigger) = trigger_type {
            let mut stmt = db.prepare(
                "SELECT id, user_id, instruction, trigger_type, is_active, priority
                 FROM instructions
                 WHERE user_id = ?1 AND is_active = 1 AND trigger_type = ?2
                 ORDER BY priority DESC",
            )?;
            let rows = stmt.query_map(params![user_id, trigger.as_str()], map_row)?;
            for row in rows {
                results.push(into_instruction(row?)?);
            }
        } else {
            let mut stmt = db.prepare(
                "SELECT id, user_id, instruction, trigger_type, is_active, priority
                 FROM instructions
                 WHERE user_id = ?1 AND is_active = 1
                 ORDER BY priority DESC",
            )?;
            let rows = stmt.query_map(params![user_id], map_row)?;
            for row in rows {
                results.push(into_instruction(row?)?);
            }
        }
        Ok(results)
    }

    pub async fn set_instruction_active(&self, id: &str, is_active: bool) -> Result<bool> {
        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE instructions SET is_active = ?1 WHERE id = ?2",
            params![is_active, id],
        )?;
        Ok(updated > 0)
    }

    pub async fn remove_instruction(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let deleted = db.execute("DELETE FROM instructions WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}
