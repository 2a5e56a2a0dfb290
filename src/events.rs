//! Append-only audit log of stopwatch and defect lifecycle events.
//!
//! Each event is one line, `timestamp uuid phase event comment`, joined by
//! single spaces. Downstream audit tooling parses this layout, so it must not
//! change.

use crate::types::{Phase, phase_label};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Placeholder uuid for events not tied to a defect.
pub const NO_UUID: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Pausing,
    Resuming,
    Stop,
    PhaseChange,
    NewDefect,
    DuplicateDefect,
    CheckedDefect,
    UncheckedDefect,
    ActivateDefect,
    DeletedDefect,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Pausing => "pausing!",
            EventKind::Resuming => "resuming",
            EventKind::Stop => "stop",
            EventKind::PhaseChange => "phase",
            EventKind::NewDefect => "new_defect",
            EventKind::DuplicateDefect => "dup_defect",
            EventKind::CheckedDefect => "checked_defect",
            EventKind::UncheckedDefect => "unchecked_defect",
            EventKind::ActivateDefect => "activate_defect",
            EventKind::DeletedDefect => "deleted_defect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp: DateTime<Local>,
    pub phase: Option<Phase>,
    pub kind: EventKind,
    pub uuid: String,
    pub comment: String,
}

impl Event {
    pub fn new(phase: Option<Phase>, kind: EventKind) -> Self {
        Self {
            timestamp: Local::now(),
            phase,
            kind,
            uuid: NO_UUID.to_string(),
            comment: String::new(),
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// The audit-log line for this event (without line terminator).
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"),
            self.uuid,
            phase_label(self.phase),
            self.kind.as_str(),
            self.comment
        )
    }
}

/// Destination for audit events.
pub trait EventSink: Send + Sync {
    fn append(&self, event: Event) -> Result<()>;
}

/// Audit log file opened in append mode; every line is flushed immediately.
pub struct FileEventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileEventLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening event log {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for FileEventLog {
    fn append(&self, event: Event) -> Result<()> {
        let line = event.to_line();
        debug!(event = %line, "psp event");
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        write!(file, "{}\r\n", line)?;
        file.flush()?;
        Ok(())
    }
}

/// Collects events in memory.
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl EventSink for MemoryEventLog {
    fn append(&self, event: Event) -> Result<()> {
        debug!(event = %event.to_line(), "psp event");
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_layout_is_timestamp_uuid_phase_event_comment() {
        let event = Event::new(Some(Phase::Code), EventKind::Pausing).with_comment("phone call");
        let line = event.to_line();
        let fields: Vec<&str> = line.splitn(5, ' ').collect();
        // The timestamp itself contains a space between date and time.
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[2], NO_UUID);
        assert_eq!(fields[3], "code");
        assert_eq!(fields[4], "pausing! phone call");
    }

    #[test]
    fn file_log_appends_crlf_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.txt");
        let log = FileEventLog::open(&path).unwrap();
        log.append(Event::new(None, EventKind::Start)).unwrap();
        log.append(
            Event::new(Some(Phase::Test), EventKind::NewDefect).with_uuid("abc"),
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("-  start "));
        assert!(lines[1].contains(" abc test new_defect "));
    }
}
