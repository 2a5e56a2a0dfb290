//! SQLite-backed per-phase time summaries, scoped to one task.

use super::{Database, now_ms};
use crate::store::RecordStore;
use crate::types::{IntervalComment, Phase, TIME_SUMMARY_COLUMNS, TimeSummary};
use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params};
use tracing::warn;

/// Read a duration column leniently: NULL, negative or garbage counts as zero.
fn seconds_column(row: &Row, name: &str) -> rusqlite::Result<u64> {
    let value: Value = row.get(name)?;
    Ok(match value {
        Value::Integer(i) => i.max(0) as u64,
        Value::Real(f) if f.is_finite() && f > 0.0 => f.round() as u64,
        Value::Text(s) => s.trim().parse::<u64>().unwrap_or_else(|_| {
            warn!(column = name, value = %s, "malformed time summary field, using 0");
            0
        }),
        _ => 0,
    })
}

fn comments_column(row: &Row) -> rusqlite::Result<Vec<IntervalComment>> {
    let raw: Option<String> = row.get("comments")?;
    Ok(match raw {
        Some(json) if !json.trim().is_empty() => serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!(error = %e, "malformed time summary comments, ignoring");
            Vec::new()
        }),
        _ => Vec::new(),
    })
}

fn parse_time_summary_row(row: &Row) -> rusqlite::Result<(String, TimeSummary)> {
    let phase: String = row.get("phase")?;
    Ok((
        phase,
        TimeSummary {
            plan: seconds_column(row, "plan")?,
            actual: seconds_column(row, "actual")?,
            interruption: seconds_column(row, "interruption")?,
            off_task: seconds_column(row, "off_task")?,
            comments: comments_column(row)?,
        },
    ))
}

/// Time summaries of one task, keyed by phase.
#[derive(Clone)]
pub struct TimeSummaryTable {
    db: Database,
    task: String,
}

impl TimeSummaryTable {
    pub fn new(db: Database, task: impl Into<String>) -> Result<Self> {
        let task = task.into();
        db.ensure_task(&task)?;
        Ok(Self { db, task })
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    fn select_sql(filter: &str) -> String {
        format!(
            "SELECT {} FROM time_summaries WHERE task = ?1{}",
            TIME_SUMMARY_COLUMNS.join(", "),
            filter
        )
    }
}

impl RecordStore for TimeSummaryTable {
    type Key = Phase;
    type Record = TimeSummary;

    fn get(&self, phase: &Phase) -> Result<Option<TimeSummary>> {
        let sql = Self::select_sql(" AND phase = ?2");
        self.db.with_conn(|conn| {
            let summary = conn
                .query_row(
                    &sql,
                    params![self.task, phase.as_str()],
                    parse_time_summary_row,
                )
                .optional()?;
            Ok(summary.map(|(_, s)| s))
        })
    }

    fn put(&mut self, phase: &Phase, summary: &TimeSummary) -> Result<()> {
        let now = now_ms();
        let comments = serde_json::to_string(&summary.comments)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO time_summaries
                    (task, phase, plan, actual, interruption, off_task, comments, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(task, phase) DO UPDATE SET
                    plan = excluded.plan,
                    actual = excluded.actual,
                    interruption = excluded.interruption,
                    off_task = excluded.off_task,
                    comments = excluded.comments,
                    updated_at = excluded.updated_at",
                params![
                    self.task,
                    phase.as_str(),
                    summary.plan as i64,
                    summary.actual as i64,
                    summary.interruption as i64,
                    summary.off_task as i64,
                    comments,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    fn delete(&mut self, phase: &Phase) -> Result<bool> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM time_summaries WHERE task = ?1 AND phase = ?2",
                params![self.task, phase.as_str()],
            )?;
            Ok(deleted > 0)
        })
    }

    /// All summaries of the task in workflow order. Rows for unknown phases
    /// are skipped.
    fn iterate(&self) -> Result<Vec<(Phase, TimeSummary)>> {
        let sql = Self::select_sql("");
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![self.task], parse_time_summary_row)?
                .collect::<Result<Vec<_>, _>>()?;

            let mut summaries: Vec<(Phase, TimeSummary)> = rows
                .into_iter()
                .filter_map(|(phase, summary)| match phase.parse::<Phase>() {
                    Ok(p) => Some((p, summary)),
                    Err(_) => {
                        warn!(phase = %phase, "skipping time summary for unknown phase");
                        None
                    }
                })
                .collect();
            summaries.sort_by_key(|(p, _)| *p);
            Ok(summaries)
        })
    }

    fn sync(&mut self) -> Result<()> {
        self.db.sync()
    }
}
