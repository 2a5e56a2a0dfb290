//! SQLite-backed defect records, scoped to one task.

use super::{Database, now_ms};
use crate::error::PspError;
use crate::store::RecordStore;
use crate::types::{DEFECT_COLUMNS, Defect, DefectType, Location, Phase};
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};

fn quoted_columns() -> String {
    DEFECT_COLUMNS
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn conversion_error(idx: usize, ty: Type, err: PspError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn column_index(name: &str) -> usize {
    DEFECT_COLUMNS.iter().position(|c| *c == name).unwrap_or(0)
}

fn parse_phase_column(row: &Row, name: &str) -> rusqlite::Result<Option<Phase>> {
    let raw: Option<String> = row.get(name)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse::<Phase>()
            .map(Some)
            .map_err(|e| conversion_error(column_index(name), Type::Text, e)),
    }
}

pub fn parse_defect_row(row: &Row) -> rusqlite::Result<Defect> {
    let date_raw: String = row.get("date")?;
    let date = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d").map_err(|_| {
        conversion_error(
            column_index("date"),
            Type::Text,
            PspError::invalid_value("date", &date_raw),
        )
    })?;
    let type_code: i64 = row.get("type")?;
    let defect_type = DefectType::from_code(type_code)
        .map_err(|e| conversion_error(column_index("type"), Type::Integer, e))?;
    let fix_time: Option<i64> = row.get("fix_time")?;
    let lineno: Option<i64> = row.get("lineno")?;
    let offset: Option<i64> = row.get("offset")?;

    Ok(Defect {
        uuid: row.get("uuid")?,
        number: row.get("number")?,
        summary: row.get("summary")?,
        description: row.get("description")?,
        date,
        defect_type,
        inject_phase: parse_phase_column(row, "inject_phase")?,
        remove_phase: parse_phase_column(row, "remove_phase")?,
        fix_time: fix_time.map(|t| t.max(0) as u64),
        fix_defect: row.get("fix_defect")?,
        checked: row.get("checked")?,
        location: Location {
            filename: row.get("filename")?,
            lineno: lineno.and_then(|l| u32::try_from(l).ok()),
            offset: offset.and_then(|o| u32::try_from(o).ok()),
        },
    })
}

/// Defect records of one task.
#[derive(Clone)]
pub struct DefectTable {
    db: Database,
    task: String,
}

impl DefectTable {
    pub fn new(db: Database, task: impl Into<String>) -> Result<Self> {
        let task = task.into();
        db.ensure_task(&task)?;
        Ok(Self { db, task })
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Look up a defect by its per-task sequential number.
    pub fn get_by_number(&self, number: i64) -> Result<Option<Defect>> {
        let sql = format!(
            "SELECT {} FROM defects WHERE task = ?1 AND number = ?2",
            quoted_columns()
        );
        self.db.with_conn(|conn| {
            let defect = conn
                .query_row(&sql, params![self.task, number], parse_defect_row)
                .optional()?;
            Ok(defect)
        })
    }
}

impl RecordStore for DefectTable {
    type Key = String;
    type Record = Defect;

    fn get(&self, key: &String) -> Result<Option<Defect>> {
        let sql = format!(
            "SELECT {} FROM defects WHERE task = ?1 AND uuid = ?2",
            quoted_columns()
        );
        self.db.with_conn(|conn| {
            let defect = conn
                .query_row(&sql, params![self.task, key], parse_defect_row)
                .optional()?;
            Ok(defect)
        })
    }

    fn put(&mut self, key: &String, defect: &Defect) -> Result<()> {
        let now = now_ms();
        let updates = DEFECT_COLUMNS
            .iter()
            .filter(|c| **c != "uuid")
            .map(|c| format!("\"{0}\" = excluded.\"{0}\"", c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (2..=DEFECT_COLUMNS.len() + 1)
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO defects (task, {cols}, created_at, updated_at)
             VALUES (?1, {placeholders}, ?{now_idx}, ?{now_idx})
             ON CONFLICT(task, uuid) DO UPDATE SET {updates}, updated_at = excluded.updated_at",
            cols = quoted_columns(),
            placeholders = placeholders,
            now_idx = DEFECT_COLUMNS.len() + 2,
            updates = updates,
        );

        self.db.with_conn(|conn| {
            conn.execute(
                &sql,
                params![
                    self.task,
                    key,
                    defect.number,
                    defect.summary,
                    defect.description,
                    defect.date.format("%Y-%m-%d").to_string(),
                    defect.defect_type.code(),
                    defect.inject_phase.map(|p| p.as_str()),
                    defect.remove_phase.map(|p| p.as_str()),
                    defect.fix_time.map(|t| t as i64),
                    defect.fix_defect,
                    defect.checked,
                    defect.location.filename,
                    defect.location.lineno,
                    defect.location.offset,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    fn delete(&mut self, key: &String) -> Result<bool> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM defects WHERE task = ?1 AND uuid = ?2",
                params![self.task, key],
            )?;
            Ok(deleted > 0)
        })
    }

    /// All defects of the task, ordered by number.
    fn iterate(&self) -> Result<Vec<(String, Defect)>> {
        let sql = format!(
            "SELECT {} FROM defects WHERE task = ?1 ORDER BY number ASC",
            quoted_columns()
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let defects = stmt
                .query_map(params![self.task], parse_defect_row)?
                .map(|r| r.map(|d| (d.uuid.clone(), d)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(defects)
        })
    }

    fn sync(&mut self) -> Result<()> {
        self.db.sync()
    }
}
