//! Defect log: numbering, duplicate detection and the fix lifecycle.

use crate::error::PspError;
use crate::events::{Event, EventKind, EventSink};
use crate::store::RecordStore;
use crate::types::{Defect, DefectEdit, NewDefect, Phase};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Result of [`DefectStore::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted(String),
    /// An equal defect already existed; nothing was written.
    Duplicate(String),
}

impl AddOutcome {
    pub fn key(&self) -> &str {
        match self {
            AddOutcome::Inserted(key) | AddOutcome::Duplicate(key) => key,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AddOutcome::Duplicate(_))
    }
}

/// Defects injected in and removed in one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseDefectCounts {
    pub injected: usize,
    pub removed: usize,
}

/// Defect records of one task. Every mutation is synced before returning.
pub struct DefectStore<S> {
    store: S,
    events: Arc<dyn EventSink>,
}

impl<S> DefectStore<S>
where
    S: RecordStore<Key = String, Record = Defect>,
{
    pub fn new(store: S, events: Arc<dyn EventSink>) -> Self {
        Self { store, events }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn log(&self, phase: Option<Phase>, kind: EventKind, key: &str, comment: String) -> Result<()> {
        self.events
            .append(Event::new(phase, kind).with_uuid(key).with_comment(comment))
    }

    fn persist(&mut self, defect: &Defect) -> Result<()> {
        self.store.put(&defect.uuid, defect)?;
        self.store.sync()
    }

    pub fn get(&self, key: &str) -> Result<Option<Defect>> {
        self.store.get(&key.to_string())
    }

    fn require(&self, key: &str) -> Result<Defect> {
        self.get(key)?
            .ok_or_else(|| PspError::DefectNotFound(key.to_string()).into())
    }

    /// All defects, ordered by number.
    pub fn list(&self) -> Result<Vec<Defect>> {
        let mut defects: Vec<Defect> = self.store.iterate()?.into_iter().map(|(_, d)| d).collect();
        defects.sort_by_key(|d| d.number);
        Ok(defects)
    }

    pub fn find_by_number(&self, number: i64) -> Result<Option<Defect>> {
        Ok(self.list()?.into_iter().find(|d| d.number == number))
    }

    /// Resolve a defect by uuid or by number.
    pub fn resolve(&self, reference: &str) -> Result<Defect> {
        if let Some(defect) = self.get(reference)? {
            return Ok(defect);
        }
        let by_number = match reference.trim().trim_start_matches('#').parse::<i64>() {
            Ok(number) => self.find_by_number(number)?,
            Err(_) => None,
        };
        by_number.ok_or_else(|| PspError::DefectNotFound(reference.to_string()).into())
    }

    /// Record a defect.
    ///
    /// Without a `key`, an existing defect with the same summary, date and
    /// location makes this a logged no-op. With a `key`, the record is stored
    /// under it as given (reloading a known defect).
    pub fn add(&mut self, item: NewDefect, key: Option<String>, phase: Option<Phase>) -> Result<AddOutcome> {
        let existing = self.list()?;

        let duplicate = match key {
            None => existing
                .iter()
                .find(|d| d.duplicate_key() == item.duplicate_key()),
            Some(_) => None,
        };
        if let Some(dup) = duplicate {
            debug!(number = dup.number, summary = %item.summary, "duplicate defect ignored");
            let comment = serde_json::to_string(&item)?;
            self.log(phase, EventKind::DuplicateDefect, &dup.uuid, comment)?;
            return Ok(AddOutcome::Duplicate(dup.uuid.clone()));
        }

        let number = match item.number {
            Some(number) => number,
            None => existing.iter().map(|d| d.number).max().unwrap_or(0) + 1,
        };
        let generated = key.is_none();
        let key = key.unwrap_or_else(|| Uuid::now_v7().to_string());
        let defect = item.into_defect(key.clone(), number);
        self.persist(&defect)?;

        if generated {
            info!(number, summary = %defect.summary, "defect recorded");
            let comment = serde_json::to_string(&defect)?;
            self.log(phase, EventKind::NewDefect, &key, comment)?;
        }
        Ok(AddOutcome::Inserted(key))
    }

    /// Mark a defect fixed (or won't-fix) or reopen it. Returns whether the
    /// flag changed. The removal phase is only ever set once.
    pub fn set_checked(
        &mut self,
        key: &str,
        flag: bool,
        wontfix: bool,
        current_phase: Option<Phase>,
    ) -> Result<bool> {
        let mut defect = self.require(key)?;
        if defect.checked == flag {
            return Ok(false);
        }
        if flag {
            if defect.remove_phase.is_none() {
                defect.remove_phase = current_phase;
            }
            if wontfix {
                defect.fix_time = None;
            }
        }
        defect.checked = flag;
        self.persist(&defect)?;

        let kind = if flag {
            EventKind::CheckedDefect
        } else {
            EventKind::UncheckedDefect
        };
        info!(number = defect.number, checked = flag, wontfix, "defect status changed");
        self.log(current_phase, kind, key, String::new())?;
        Ok(true)
    }

    /// Add one second of repair time to an open defect. Returns the new total,
    /// or `None` when the defect is already checked.
    pub fn tick_fix_time(&mut self, key: &str) -> Result<Option<u64>> {
        let mut defect = self.require(key)?;
        if defect.checked {
            return Ok(None);
        }
        let total = defect.fix_time.unwrap_or(0) + 1;
        defect.fix_time = Some(total);
        self.persist(&defect)?;
        Ok(Some(total))
    }

    /// Log that a defect is now under repair.
    pub fn activate(&self, key: &str, phase: Option<Phase>) -> Result<Defect> {
        let defect = self.require(key)?;
        self.log(phase, EventKind::ActivateDefect, key, String::new())?;
        Ok(defect)
    }

    pub fn edit(&mut self, key: &str, edit: DefectEdit) -> Result<Defect> {
        let mut defect = self.require(key)?;
        defect.apply(edit);
        self.persist(&defect)?;
        debug!(number = defect.number, "defect edited");
        Ok(defect)
    }

    pub fn delete(&mut self, key: &str, phase: Option<Phase>) -> Result<bool> {
        let deleted = self.store.delete(&key.to_string())?;
        self.store.sync()?;
        if deleted {
            self.log(phase, EventKind::DeletedDefect, key, String::new())?;
        }
        Ok(deleted)
    }

    /// Delete every defect. Returns how many were removed.
    pub fn delete_all(&mut self, phase: Option<Phase>) -> Result<usize> {
        let keys: Vec<String> = self.store.iterate()?.into_iter().map(|(k, _)| k).collect();
        for key in &keys {
            self.store.delete(key)?;
        }
        self.store.sync()?;
        for key in &keys {
            self.log(phase, EventKind::DeletedDefect, key, String::new())?;
        }
        info!(count = keys.len(), "all defects deleted");
        Ok(keys.len())
    }

    /// Injected/removed defect counts per phase.
    pub fn counts(&self) -> Result<BTreeMap<Phase, PhaseDefectCounts>> {
        let mut counts: BTreeMap<Phase, PhaseDefectCounts> = BTreeMap::new();
        for defect in self.list()? {
            if let Some(phase) = defect.inject_phase {
                counts.entry(phase).or_default().injected += 1;
            }
            if let Some(phase) = defect.remove_phase {
                counts.entry(phase).or_default().removed += 1;
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventLog;
    use crate::store::MemoryStore;
    use crate::store::testing::FailingStore;
    use crate::types::Location;
    use chrono::NaiveDate;

    fn store() -> (DefectStore<MemoryStore<String, Defect>>, Arc<MemoryEventLog>) {
        let log = Arc::new(MemoryEventLog::new());
        (DefectStore::new(MemoryStore::new(), log.clone()), log)
    }

    fn item(summary: &str) -> NewDefect {
        let mut item = NewDefect::new(summary, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        item.location = Location::at("a.py", 10);
        item
    }

    #[test]
    fn numbers_increase_from_max() {
        let (mut defects, _) = store();
        let mut first = item("first");
        first.number = Some(7);
        defects.add(first, None, None).unwrap();
        let key = defects.add(item("second"), None, None).unwrap();
        assert_eq!(defects.get(key.key()).unwrap().unwrap().number, 8);
    }

    #[test]
    fn duplicate_is_logged_not_inserted() {
        let (mut defects, log) = store();
        let first = defects.add(item("E1 syntax"), None, Some(Phase::Compile)).unwrap();
        let second = defects.add(item("E1 syntax"), None, Some(Phase::Compile)).unwrap();
        assert!(second.is_duplicate());
        assert_eq!(first.key(), second.key());
        assert_eq!(defects.store().len(), 1);
        assert_eq!(
            log.kinds(),
            vec![EventKind::NewDefect, EventKind::DuplicateDefect]
        );
    }

    #[test]
    fn explicit_key_skips_duplicate_check() {
        let (mut defects, log) = store();
        defects.add(item("same"), None, None).unwrap();
        let outcome = defects
            .add(item("same"), Some("legacy-key".into()), None)
            .unwrap();
        assert_eq!(outcome, AddOutcome::Inserted("legacy-key".into()));
        assert_eq!(defects.store().len(), 2);
        assert_eq!(log.kinds(), vec![EventKind::NewDefect]);
    }

    #[test]
    fn fix_time_only_ticks_while_open() {
        let (mut defects, _) = store();
        let key = defects.add(item("x"), None, None).unwrap().key().to_string();
        assert_eq!(defects.tick_fix_time(&key).unwrap(), Some(1));
        assert_eq!(defects.tick_fix_time(&key).unwrap(), Some(2));
        defects.set_checked(&key, true, false, Some(Phase::Test)).unwrap();
        assert_eq!(defects.tick_fix_time(&key).unwrap(), None);
        assert_eq!(defects.get(&key).unwrap().unwrap().fix_time, Some(2));
    }

    #[test]
    fn unknown_defect_is_not_found() {
        let (mut defects, _) = store();
        let err = defects.tick_fix_time("nope").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PspError>(),
            Some(PspError::DefectNotFound(_))
        ));
    }

    #[test]
    fn counts_group_by_phase() {
        let (mut defects, _) = store();
        let mut a = item("a");
        a.inject_phase = Some(Phase::Code);
        let key = defects.add(a, None, None).unwrap().key().to_string();
        let mut b = item("b");
        b.inject_phase = Some(Phase::Code);
        defects.add(b, None, None).unwrap();
        defects.set_checked(&key, true, false, Some(Phase::Test)).unwrap();

        let counts = defects.counts().unwrap();
        assert_eq!(counts[&Phase::Code].injected, 2);
        assert_eq!(counts[&Phase::Test].removed, 1);
    }

    #[test]
    fn resolve_accepts_number() {
        let (mut defects, _) = store();
        let key = defects.add(item("a"), None, None).unwrap().key().to_string();
        assert_eq!(defects.resolve("1").unwrap().uuid, key);
        assert_eq!(defects.resolve("#1").unwrap().uuid, key);
        assert_eq!(defects.resolve(&key).unwrap().number, 1);
        assert!(defects.resolve("9").is_err());
    }

    #[test]
    fn failed_write_is_reported_and_not_logged() {
        let log = Arc::new(MemoryEventLog::new());
        let store = FailingStore::<String, Defect>::new();
        let switch = store.switch();
        let mut defects = DefectStore::new(store, log.clone());
        let key = defects.add(item("a"), None, None).unwrap().key().to_string();

        switch.set(true);
        assert!(defects.add(item("b"), None, None).is_err());
        assert!(defects.set_checked(&key, true, false, Some(Phase::Test)).is_err());
        assert!(defects.tick_fix_time(&key).is_err());
        assert!(defects.delete(&key, None).is_err());

        assert_eq!(log.kinds(), vec![EventKind::NewDefect]);
        let defect = defects.get(&key).unwrap().unwrap();
        assert!(!defect.checked);
        assert_eq!(defect.remove_phase, None);
        assert_eq!(defects.list().unwrap().len(), 1);
    }
}
