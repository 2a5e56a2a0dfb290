//! Task bookkeeping: the owner of defects and time summaries.

use super::{Database, now_ms};
use crate::types::Phase;
use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use tracing::warn;

impl Database {
    /// Create the task row if it does not exist yet.
    pub fn ensure_task(&self, name: &str) -> Result<()> {
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO tasks (name, current_phase, created_at, updated_at)
                 VALUES (?1, NULL, ?2, ?2)",
                params![name, now],
            )?;
            Ok(())
        })
    }

    /// The phase the task was last left in.
    pub fn get_current_phase(&self, task: &str) -> Result<Option<Phase>> {
        self.with_conn(|conn| {
            let stored: Option<Option<String>> = conn
                .query_row(
                    "SELECT current_phase FROM tasks WHERE name = ?1",
                    params![task],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(stored.flatten().and_then(|s| match s.parse::<Phase>() {
                Ok(phase) => Some(phase),
                Err(err) => {
                    warn!(task, error = %err, "ignoring stored phase");
                    None
                }
            }))
        })
    }

    pub fn set_current_phase(&self, task: &str, phase: Option<Phase>) -> Result<()> {
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (name, current_phase, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(name) DO UPDATE SET current_phase = excluded.current_phase,
                                                 updated_at = excluded.updated_at",
                params![task, phase.map(|p| p.as_str()), now],
            )?;
            Ok(())
        })
    }

    /// Remove a task together with its defects and time summaries.
    pub fn delete_task(&self, task: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM tasks WHERE name = ?1", params![task])?;
            Ok(deleted > 0)
        })
    }
}
