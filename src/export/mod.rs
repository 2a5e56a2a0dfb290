//! Export/import of a task's PSP records.
//!
//! A snapshot holds the defect log and the per-phase time summaries of one
//! task as JSON, optionally gzip-compressed. Snapshots can be version
//! controlled and loaded back into another database.

use crate::defects::DefectStore;
use crate::error::PspError;
use crate::store::RecordStore;
use crate::tracker::PlanVsActualTracker;
use crate::types::{Defect, Phase, TimeSummary};
use anyhow::Result;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use tracing::{info, warn};

/// Schema version of exported snapshots.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Export format version (semver).
pub const EXPORT_VERSION: &str = "1.0.0";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: i32,

    /// Export format version (semver)
    pub export_version: String,

    /// ISO 8601 timestamp of export
    pub exported_at: String,

    /// Tool name and version that created this export
    pub exported_by: String,

    pub task: String,

    #[serde(default)]
    pub current_phase: Option<Phase>,

    /// Defects ordered by number.
    #[serde(default)]
    pub defects: Vec<Defect>,

    #[serde(default)]
    pub time_summaries: BTreeMap<Phase, TimeSummary>,
}

impl Snapshot {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            export_version: EXPORT_VERSION.to_string(),
            exported_at: chrono::Utc::now().to_rfc3339(),
            exported_by: format!("psp-metrics v{}", env!("CARGO_PKG_VERSION")),
            task: task.into(),
            current_phase: None,
            defects: Vec::new(),
            time_summaries: BTreeMap::new(),
        }
    }

    /// Capture the records of a task.
    pub fn capture<T, D>(
        task: &str,
        current_phase: Option<Phase>,
        tracker: &PlanVsActualTracker<T>,
        defects: &DefectStore<D>,
    ) -> Result<Self>
    where
        T: RecordStore<Key = Phase, Record = TimeSummary>,
        D: RecordStore<Key = String, Record = Defect>,
    {
        let mut snapshot = Self::new(task);
        snapshot.current_phase = current_phase;
        snapshot.defects = defects.list()?;
        snapshot.time_summaries = tracker.all()?;
        Ok(snapshot)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load a snapshot from a file (supports both plain JSON and gzip).
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        if data.starts_with(&GZIP_MAGIC) {
            Ok(serde_json::from_reader(GzDecoder::new(data.as_slice()))?)
        } else {
            Ok(serde_json::from_slice(&data)?)
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the snapshot as JSON, gzip-compressed if requested.
    pub fn write_to<W: Write>(&self, writer: W, gzip: bool) -> Result<()> {
        let json = self.to_json_pretty()?;
        if gzip {
            let mut encoder = GzEncoder::new(writer, Compression::default());
            encoder.write_all(json.as_bytes())?;
            encoder.finish()?;
        } else {
            let mut writer = writer;
            writer.write_all(json.as_bytes())?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn is_schema_compatible(&self) -> bool {
        self.schema_version == CURRENT_SCHEMA_VERSION
    }

    /// Defect numbers are unique per task: fail if a snapshot defect would
    /// take a number held by a different defect, either in `existing` or
    /// earlier in the snapshot.
    fn check_numbers(&self, existing: &[Defect]) -> Result<()> {
        let mut owners: HashMap<i64, &str> =
            existing.iter().map(|d| (d.number, d.uuid.as_str())).collect();
        for defect in &self.defects {
            if let Some(owner) = owners.get(&defect.number) {
                if *owner != defect.uuid {
                    return Err(PspError::NumberConflict {
                        number: defect.number,
                        existing: owner.to_string(),
                        incoming: defect.uuid.clone(),
                    }
                    .into());
                }
            }
            owners.insert(defect.number, &defect.uuid);
        }
        Ok(())
    }

    /// Load the snapshot's records into a task. Defects keep their uuid and
    /// number; existing records with the same keys are overwritten, or all
    /// existing defects are dropped first under [`ImportMode::Replace`].
    /// Nothing is written when a defect number conflicts.
    pub fn apply<T, D>(
        &self,
        tracker: &mut PlanVsActualTracker<T>,
        defects: &mut DefectStore<D>,
        mode: ImportMode,
        phase: Option<Phase>,
    ) -> Result<ImportSummary>
    where
        T: RecordStore<Key = Phase, Record = TimeSummary>,
        D: RecordStore<Key = String, Record = Defect>,
    {
        if !self.is_schema_compatible() {
            warn!(
                version = self.schema_version,
                expected = CURRENT_SCHEMA_VERSION,
                "snapshot schema version differs"
            );
        }
        let existing = match mode {
            ImportMode::Merge => defects.list()?,
            ImportMode::Replace => Vec::new(),
        };
        self.check_numbers(&existing)?;

        if mode == ImportMode::Replace {
            let removed = defects.delete_all(phase)?;
            info!(removed, "existing defects cleared before import");
        }
        for (summary_phase, summary) in &self.time_summaries {
            tracker.restore(*summary_phase, summary.clone())?;
        }
        for defect in &self.defects {
            let key = defect.uuid.clone();
            defects.add(defect.clone().into(), Some(key), phase)?;
        }
        info!(
            task = %self.task,
            defects = self.defects.len(),
            phases = self.time_summaries.len(),
            "snapshot imported"
        );
        Ok(ImportSummary {
            defects: self.defects.len(),
            time_summaries: self.time_summaries.len(),
        })
    }
}

/// What happens to a task's existing defects on import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImportMode {
    /// Keep them; snapshot defects with the same uuid overwrite.
    #[default]
    Merge,
    Replace,
}

/// Counts of imported records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub defects: usize,
    pub time_summaries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::MemoryEventLog;
    use crate::store::MemoryStore;
    use crate::types::NewDefect;
    use std::sync::Arc;

    #[test]
    fn test_snapshot_new() {
        let snapshot = Snapshot::new("demo");
        assert_eq!(snapshot.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(snapshot.export_version, EXPORT_VERSION);
        assert!(snapshot.defects.is_empty());
        assert!(snapshot.is_schema_compatible());
    }

    #[test]
    fn test_gzip_output_is_detected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json.gz");
        let mut snapshot = Snapshot::new("demo");
        snapshot.time_summaries.insert(
            Phase::Code,
            TimeSummary {
                plan: 600,
                ..Default::default()
            },
        );
        snapshot.write_to(File::create(&path).unwrap(), true).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(raw.starts_with(&GZIP_MAGIC));
        let loaded = Snapshot::from_file(&path).unwrap();
        assert_eq!(loaded.task, "demo");
        assert_eq!(loaded.time_summaries[&Phase::Code].plan, 600);
    }

    #[test]
    fn test_missing_sections_default() {
        let json = r#"{
            "schema_version": 1,
            "export_version": "1.0.0",
            "exported_at": "2024-01-01T00:00:00Z",
            "exported_by": "psp-metrics v0.1.0",
            "task": "demo"
        }"#;
        let snapshot = Snapshot::from_json(json).unwrap();
        assert!(snapshot.defects.is_empty());
        assert!(snapshot.current_phase.is_none());
    }

    #[test]
    fn test_number_conflict_writes_nothing() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut tracker = PlanVsActualTracker::new(MemoryStore::new());
        let mut defects = DefectStore::new(MemoryStore::new(), Arc::new(MemoryEventLog::new()));
        defects.add(NewDefect::new("local", date), None, None).unwrap();

        let mut snapshot = Snapshot::new("demo");
        snapshot.time_summaries.insert(
            Phase::Code,
            TimeSummary {
                plan: 999,
                ..Default::default()
            },
        );
        snapshot
            .defects
            .push(NewDefect::new("incoming", date).into_defect("other".to_string(), 1));

        let err = snapshot
            .apply(&mut tracker, &mut defects, ImportMode::Merge, None)
            .unwrap_err();
        let code = err.downcast_ref::<PspError>().map(PspError::code);
        assert_eq!(code, Some(ErrorCode::DefectNumberConflict));
        assert!(tracker.store().is_empty());
        assert_eq!(defects.list().unwrap()[0].summary, "local");

        let summary = snapshot
            .apply(&mut tracker, &mut defects, ImportMode::Replace, None)
            .unwrap();
        assert_eq!(summary.defects, 1);
        assert_eq!(defects.list().unwrap()[0].uuid, "other");
        assert_eq!(tracker.get(Phase::Code).unwrap().plan, 999);
    }
}
