//! Plan versus actual time per phase.

use crate::stopwatch::TickOutcome;
use crate::store::RecordStore;
use crate::types::{IntervalComment, Phase, TimeField, TimeSummary};
use anyhow::Result;
use std::collections::BTreeMap;
use tracing::debug;

pub use crate::format::{format_duration, parse_duration};

/// Per-phase plan/actual/interruption/off-task totals of one task.
///
/// Rows are created lazily on the first tick or plan edit of a phase. Every
/// mutation is synced to the backing store before returning.
pub struct PlanVsActualTracker<S> {
    store: S,
}

impl<S> PlanVsActualTracker<S>
where
    S: RecordStore<Key = Phase, Record = TimeSummary>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Summary for a phase; all zeros when nothing was recorded yet.
    pub fn get(&self, phase: Phase) -> Result<TimeSummary> {
        Ok(self.store.get(&phase)?.unwrap_or_default())
    }

    /// Every recorded summary, keyed by phase.
    pub fn all(&self) -> Result<BTreeMap<Phase, TimeSummary>> {
        Ok(self.store.iterate()?.into_iter().collect())
    }

    fn update<F>(&mut self, phase: Phase, f: F) -> Result<TimeSummary>
    where
        F: FnOnce(&mut TimeSummary),
    {
        let mut summary = self.get(phase)?;
        f(&mut summary);
        self.store.put(&phase, &summary)?;
        self.store.sync()?;
        Ok(summary)
    }

    pub fn set_plan(&mut self, phase: Phase, seconds: u64) -> Result<TimeSummary> {
        debug!(phase = %phase, seconds, "plan estimate set");
        self.update(phase, |s| s.plan = seconds)
    }

    /// Add one second to `field` of `phase`.
    pub fn count(&mut self, phase: Phase, field: TimeField) -> Result<TimeSummary> {
        self.update(phase, |s| s.increment(field))
    }

    /// Apply a stopwatch tick. Ticks without a current phase are not recorded.
    pub fn record_tick(&mut self, outcome: TickOutcome) -> Result<Option<TimeSummary>> {
        match outcome {
            TickOutcome::Counted {
                phase: Some(phase),
                field,
            } => self.count(phase, field).map(Some),
            _ => Ok(None),
        }
    }

    /// Attach a message to a closed interruption of `phase`.
    pub fn comment(&mut self, phase: Phase, message: &str, delta: u64) -> Result<TimeSummary> {
        self.update(phase, |s| {
            s.comments.push(IntervalComment {
                message: message.to_string(),
                delta,
            })
        })
    }

    /// Replace the stored summary of a phase, e.g. when importing.
    pub fn restore(&mut self, phase: Phase, summary: TimeSummary) -> Result<()> {
        self.store.put(&phase, &summary)?;
        self.store.sync()
    }

    /// Phases that still lack a plan estimate.
    pub fn missing_estimates(&self) -> Result<Vec<Phase>> {
        let all = self.all()?;
        Ok(Phase::ALL
            .iter()
            .copied()
            .filter(|p| all.get(p).map(|s| s.plan == 0).unwrap_or(true))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::store::testing::FailingStore;

    fn tracker() -> PlanVsActualTracker<MemoryStore<Phase, TimeSummary>> {
        PlanVsActualTracker::new(MemoryStore::new())
    }

    #[test]
    fn rows_are_created_lazily() {
        let mut t = tracker();
        assert_eq!(t.get(Phase::Design).unwrap(), TimeSummary::default());
        assert!(t.store().is_empty());
        t.count(Phase::Design, TimeField::Actual).unwrap();
        assert_eq!(t.store().len(), 1);
        assert_eq!(t.get(Phase::Design).unwrap().actual, 1);
    }

    #[test]
    fn ticks_without_phase_are_dropped() {
        let mut t = tracker();
        let outcome = TickOutcome::Counted {
            phase: None,
            field: TimeField::Actual,
        };
        assert!(t.record_tick(outcome).unwrap().is_none());
        assert!(t.record_tick(TickOutcome::Ignored).unwrap().is_none());
        assert!(t.all().unwrap().is_empty());
    }

    #[test]
    fn every_mutation_syncs() {
        let mut t = tracker();
        t.set_plan(Phase::Code, 600).unwrap();
        t.count(Phase::Code, TimeField::OffTask).unwrap();
        t.comment(Phase::Code, "phone call", 30).unwrap();
        assert_eq!(t.store().sync_count(), 3);

        let summary = t.get(Phase::Code).unwrap();
        assert_eq!(summary.plan, 600);
        assert_eq!(summary.off_task, 1);
        assert_eq!(summary.comments[0].message, "phone call");
    }

    #[test]
    fn missing_estimates_lists_unplanned_phases() {
        let mut t = tracker();
        for phase in Phase::ALL {
            if phase != Phase::Review {
                t.set_plan(phase, 60).unwrap();
            }
        }
        assert_eq!(t.missing_estimates().unwrap(), vec![Phase::Review]);
    }

    #[test]
    fn store_failures_reach_the_caller() {
        let store = FailingStore::<Phase, TimeSummary>::new();
        let switch = store.switch();
        let mut t = PlanVsActualTracker::new(store);
        t.set_plan(Phase::Code, 600).unwrap();

        switch.set(true);
        assert!(t.set_plan(Phase::Code, 900).is_err());
        let tick = TickOutcome::Counted {
            phase: Some(Phase::Code),
            field: TimeField::Actual,
        };
        assert!(t.record_tick(tick).is_err());
        assert!(t.comment(Phase::Code, "lunch", 60).is_err());
        assert_eq!(t.get(Phase::Code).unwrap().plan, 600);
    }
}
