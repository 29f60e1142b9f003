use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;

use super::Storage;
use super::types::LedgerEntry;

impl Storage {
    /// Attempt to claim the thank-you action for `(user_id, contact_id)`.
    /// Returns true when this call won the claim. The uniqueness constraint
    /// makes the second and every later attempt a no-op, across processes
    /// and restarts.
    pub async fn ledger_try_claim(
        &self,
        user_id: &str,
        contact_id: &str,
        email_address: &str,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let inserted = db.execute(
            "INSERT INTO thank_you_ledger (user_id, contact_id, email_address, sent_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, contact_id) DO NOTHING",
            params![user_id, contact_id, email_address, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    pub async fn ledger_contains(&self, user_id: &str, contact_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM thank_you_ledger WHERE user_id = ?1 AND contact_id = ?2",
            params![user_id, contact_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub async fn ledger_entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT user_id, contact_id, email_address, sent_at
             FROM thank_you_ledger WHERE user_id = ?1 ORDER BY sent_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (user_id, contact_id, email_address, sent_at) = row?;
            entries.push(LedgerEntry {
                sent_at: DateTime::parse_from_rfc3339(&sent_at)
                    .with_context(|| format!("bad timestamp in ledger: {}", sent_at))?
                    .with_timezone(&Utc),
                user_id,
                contact_id,
                email_address,
            });
        }
        Ok(entries)
    }
}
