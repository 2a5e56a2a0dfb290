//! A PSP session: one task's stopwatch, time log, defect log and provenance.

use crate::activity::ActivityProbe;
use crate::db::{Database, DefectTable, TimeSummaryTable};
use crate::defects::{AddOutcome, DefectStore};
use crate::error::PspError;
use crate::events::EventSink;
use crate::export::{ImportMode, ImportSummary, Snapshot};
use crate::provenance::{FileProvenance, ProvenanceSource};
use crate::stopwatch::{StopwatchController, TickOutcome, Trigger};
use crate::store::RecordStore;
use crate::tracker::PlanVsActualTracker;
use crate::types::{Defect, DefectType, Location, NewDefect, Phase, TimeField, TimeSummary, phase_label};
use anyhow::Result;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// A defect reported by an external checker (linter, test runner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub summary: String,
    #[serde(rename = "type", default)]
    pub defect_type: DefectType,
    #[serde(default)]
    pub description: String,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    pub offset: Option<u32>,
}

impl Finding {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            defect_type: DefectType::default(),
            description: String::new(),
            filename: None,
            lineno: None,
            offset: None,
        }
    }

    pub fn at(mut self, filename: impl Into<String>, lineno: u32) -> Self {
        self.filename = Some(filename.into());
        self.lineno = Some(lineno);
        self
    }
}

/// Outcome of a phase completion check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseCheck {
    pub phase: Option<Phase>,
    pub errors: Vec<String>,
    pub defects: Vec<String>,
    /// Set when the check passed and the phase advanced.
    pub advanced_to: Option<Option<Phase>>,
}

impl PhaseCheck {
    pub fn passed(&self) -> bool {
        self.advanced_to.is_some()
    }
}

pub struct PspSession<T, D, P> {
    task: String,
    stopwatch: StopwatchController,
    tracker: PlanVsActualTracker<T>,
    defects: DefectStore<D>,
    provenance: P,
    active_defect: Option<String>,
    db: Option<Database>,
}

pub type SqliteSession = PspSession<TimeSummaryTable, DefectTable, FileProvenance>;

impl SqliteSession {
    /// Load a task from the database, resuming at its stored phase.
    pub fn open(
        db: Database,
        task: &str,
        metadata_dir: &Path,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let phase = db.get_current_phase(task)?;
        let times = TimeSummaryTable::new(db.clone(), task)?;
        let defects = DefectTable::new(db.clone(), task)?;
        let provenance = FileProvenance::open(metadata_dir)?;
        let mut session = PspSession::new(task, phase, times, defects, provenance, events);
        session.db = Some(db);
        Ok(session)
    }
}

impl<T, D, P> PspSession<T, D, P>
where
    T: RecordStore<Key = Phase, Record = TimeSummary>,
    D: RecordStore<Key = String, Record = Defect>,
    P: ProvenanceSource,
{
    pub fn new(
        task: impl Into<String>,
        phase: Option<Phase>,
        times: T,
        defects: D,
        provenance: P,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            task: task.into(),
            stopwatch: StopwatchController::new(phase, events.clone()),
            tracker: PlanVsActualTracker::new(times),
            defects: DefectStore::new(defects, events),
            provenance,
            active_defect: None,
            db: None,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn phase(&self) -> Option<Phase> {
        self.stopwatch.phase()
    }

    pub fn stopwatch(&self) -> &StopwatchController {
        &self.stopwatch
    }

    pub fn tracker(&self) -> &PlanVsActualTracker<T> {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut PlanVsActualTracker<T> {
        &mut self.tracker
    }

    pub fn defects(&self) -> &DefectStore<D> {
        &self.defects
    }

    pub fn defects_mut(&mut self) -> &mut DefectStore<D> {
        &mut self.defects
    }

    pub fn provenance_mut(&mut self) -> &mut P {
        &mut self.provenance
    }

    pub fn active_defect(&self) -> Option<&str> {
        self.active_defect.as_deref()
    }

    pub fn start(&mut self, trigger: Trigger) -> Result<bool> {
        self.stopwatch.start(trigger)
    }

    pub fn pause(&mut self, comment: &str, trigger: Trigger) -> Result<bool> {
        self.stopwatch.pause(comment, trigger)
    }

    /// Close the open interruption. A non-empty comment is kept in the
    /// phase's time log together with the interruption length.
    pub fn resume(&mut self, comment: &str, trigger: Trigger) -> Result<Option<u64>> {
        let elapsed = self.stopwatch.resume(comment, trigger)?;
        if let (Some(delta), Some(phase)) = (elapsed, self.phase()) {
            if !comment.is_empty() {
                self.tracker.comment(phase, comment, delta)?;
            }
        }
        Ok(elapsed)
    }

    pub fn stop(&mut self, trigger: Trigger) -> Result<bool> {
        self.stopwatch.stop(trigger)
    }

    /// Stop tracking and ignore the activity probe until `resume_task`.
    pub fn suspend(&mut self) -> Result<()> {
        info!(task = %self.task, "task suspended");
        self.stopwatch.suspend()
    }

    pub fn resume_task(&mut self) -> Result<()> {
        info!(task = %self.task, "task resumed");
        self.stopwatch.resume_task()
    }

    /// Begin probe-driven tracking of this task.
    pub fn activate_task(&mut self) -> Result<bool> {
        info!(task = %self.task, phase = phase_label(self.phase()), "task activated");
        self.stopwatch.start(Trigger::Probe)
    }

    /// Account one elapsed second.
    pub fn tick(&mut self, probe: &dyn ActivityProbe) -> Result<TickOutcome> {
        let outcome = self.stopwatch.tick(probe);
        self.tracker.record_tick(outcome)?;

        let on_task = matches!(
            outcome,
            TickOutcome::Counted {
                field: TimeField::Actual,
                ..
            }
        );
        if let Some(key) = self.active_defect.clone().filter(|_| on_task) {
            match self.defects.tick_fix_time(&key) {
                Ok(Some(_)) => {}
                Ok(None) => self.active_defect = None,
                Err(e) if matches!(e.downcast_ref::<PspError>(), Some(PspError::DefectNotFound(_))) => {
                    warn!(defect = %key, "active defect no longer exists");
                    self.active_defect = None;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    /// Switch phase. Pending edits of tracked files are attributed to the
    /// outgoing phase first; if that attribution cannot be stored the phase
    /// is left unchanged.
    pub fn set_phase(&mut self, phase: Option<Phase>) -> Result<Option<Phase>> {
        let previous = self.phase();
        if previous == phase {
            return Ok(previous);
        }
        if previous.is_some() {
            let count = self.provenance.refresh_tracked(previous)?;
            info!(files = count, "provenance refreshed before phase change");
        }
        self.stopwatch.set_phase(phase)?;
        if let Some(db) = &self.db {
            db.set_current_phase(&self.task, phase)?;
        }
        Ok(previous)
    }

    /// Advance to the next phase in workflow order. From no phase this is
    /// planning; after postmortem there is no phase.
    pub fn next_phase(&mut self) -> Result<Option<Phase>> {
        let next = match self.phase() {
            Some(phase) => phase.next(),
            None => Some(Phase::Planning),
        };
        self.set_phase(next)?;
        Ok(next)
    }

    /// Injection phase of a source location, or none when it cannot be
    /// determined.
    fn injection_phase(&mut self, filename: Option<&str>, lineno: Option<u32>) -> Option<Phase> {
        let (filename, lineno) = match (filename, lineno) {
            (Some(f), Some(l)) if l > 0 && !f.is_empty() && !f.starts_with('<') => (f, l),
            _ => return None,
        };
        match self
            .provenance
            .injection_phase(Path::new(filename), lineno as usize, self.phase())
        {
            Ok(phase) => phase,
            Err(e) => {
                warn!(file = filename, lineno, error = %e, "no provenance for defect location");
                None
            }
        }
    }

    /// Record a checker finding, attributing it to the phase that wrote the line.
    pub fn notify_defect(&mut self, finding: Finding) -> Result<AddOutcome> {
        let inject_phase = self.injection_phase(finding.filename.as_deref(), finding.lineno);
        let mut item = NewDefect::new(finding.summary, Local::now().date_naive());
        item.defect_type = finding.defect_type;
        item.description = finding.description;
        item.inject_phase = inject_phase;
        item.location = Location {
            filename: finding.filename,
            lineno: finding.lineno,
            offset: finding.offset,
        };
        self.defects.add(item, None, self.phase())
    }

    /// Record a manually entered defect. Without an explicit injection phase
    /// the location's provenance is used, falling back to the current phase.
    pub fn record_defect(&mut self, mut item: NewDefect) -> Result<AddOutcome> {
        if item.inject_phase.is_none() {
            item.inject_phase = if item.location.filename.is_some() && item.location.lineno.is_some() {
                self.injection_phase(item.location.filename.as_deref(), item.location.lineno)
            } else {
                self.phase()
            };
        }
        self.defects.add(item, None, self.phase())
    }

    /// Mark a defect (by uuid or number) fixed, won't-fix or open again.
    pub fn check_defect(&mut self, reference: &str, flag: bool, wontfix: bool) -> Result<bool> {
        let defect = self.defects.resolve(reference)?;
        let changed = self
            .defects
            .set_checked(&defect.uuid, flag, wontfix, self.phase())?;
        if flag && self.active_defect.as_deref() == Some(defect.uuid.as_str()) {
            self.active_defect = None;
        }
        Ok(changed)
    }

    /// Start accumulating repair time on a defect.
    pub fn select_defect(&mut self, reference: &str) -> Result<Defect> {
        let defect = self.defects.resolve(reference)?;
        let defect = self.defects.activate(&defect.uuid, self.phase())?;
        self.active_defect = Some(defect.uuid.clone());
        Ok(defect)
    }

    /// Load a snapshot's time log and defects into this task.
    pub fn import_snapshot(&mut self, snapshot: &Snapshot, mode: ImportMode) -> Result<ImportSummary> {
        if snapshot.task != self.task {
            warn!(from = %snapshot.task, into = %self.task, "importing snapshot of another task");
        }
        let phase = self.phase();
        snapshot.apply(&mut self.tracker, &mut self.defects, mode, phase)
    }

    /// Check whether the current phase is complete, recording checker
    /// findings as defects. A clean check stops the stopwatch and moves on
    /// to the next phase.
    pub fn check_phase(&mut self, findings: Vec<Finding>) -> Result<PhaseCheck> {
        let phase = self.phase();
        let mut errors = Vec::new();
        let mut defects = Vec::new();

        match phase {
            Some(Phase::Planning) => {
                for missing in self.tracker.missing_estimates()? {
                    errors.push(format!("Complete {} estimate time!", missing));
                }
            }
            Some(Phase::Postmortem) => {
                for defect in self.defects.list()? {
                    if defect.remove_phase.is_none() {
                        errors.push(format!("Defect {} not fixed!", defect.number));
                    }
                }
            }
            _ => {
                for finding in findings {
                    let summary = finding.summary.clone();
                    let outcome = self.notify_defect(finding)?;
                    errors.push(format!("Defect found: {}", summary));
                    defects.push(outcome.key().to_string());
                }
            }
        }

        let advanced_to = if errors.is_empty() {
            self.stop(Trigger::Manual)?;
            Some(self.next_phase()?)
        } else {
            warn!(phase = phase_label(phase), errors = errors.len(), "phase check failed");
            None
        };
        Ok(PhaseCheck {
            phase,
            errors,
            defects,
            advanced_to,
        })
    }
}
