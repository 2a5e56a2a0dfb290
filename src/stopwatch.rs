//! Phase stopwatch: running/interrupted state and per-second tick accounting.
//!
//! The controller owns the current phase and the interruption accumulator.
//! Transitions can be initiated by the operator ([`Trigger::Manual`]) or by
//! an activity probe ([`Trigger::Probe`]). Once the operator takes manual
//! control, probe-initiated transitions are ignored until tracking is handed
//! back (`resume_task`), so a probe never silently undoes a manual decision.

use crate::activity::ActivityProbe;
use crate::events::{Event, EventKind, EventSink};
use crate::format::format_duration;
use crate::types::{Phase, TimeField, phase_label};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopwatchState {
    Stopped,
    Running,
    /// Running, but the elapsed time is an interruption.
    Interrupted,
}

/// Who asked for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    Probe,
}

/// What a single tick was counted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ignored,
    Counted {
        phase: Option<Phase>,
        field: TimeField,
    },
}

pub struct StopwatchController {
    phase: Option<Phase>,
    running: bool,
    interruption: Option<u64>,
    automatic: bool,
    suspended: bool,
    events: Arc<dyn EventSink>,
}

impl StopwatchController {
    pub fn new(phase: Option<Phase>, events: Arc<dyn EventSink>) -> Self {
        Self {
            phase,
            running: false,
            interruption: None,
            automatic: true,
            suspended: false,
            events,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn state(&self) -> StopwatchState {
        match (self.running, self.interruption) {
            (false, _) => StopwatchState::Stopped,
            (true, None) => StopwatchState::Running,
            (true, Some(_)) => StopwatchState::Interrupted,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Seconds accumulated in the open interruption, if any.
    pub fn interruption_elapsed(&self) -> Option<u64> {
        self.interruption
    }

    pub fn is_automatic(&self) -> bool {
        self.automatic
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn log(&self, kind: EventKind, comment: impl Into<String>) -> Result<()> {
        self.events
            .append(Event::new(self.phase, kind).with_comment(comment))
    }

    /// Probe-initiated transitions are honoured only while tracking is automatic.
    fn accepts(&self, trigger: Trigger) -> bool {
        match trigger {
            Trigger::Manual => true,
            Trigger::Probe => self.automatic && !self.suspended,
        }
    }

    fn take_control(&mut self, trigger: Trigger) {
        if trigger == Trigger::Manual {
            self.automatic = false;
        }
    }

    /// Begin ticking. Returns false if already running or the request was ignored.
    pub fn start(&mut self, trigger: Trigger) -> Result<bool> {
        if !self.accepts(trigger) {
            debug!(?trigger, "start ignored under manual control");
            return Ok(false);
        }
        if self.running {
            return Ok(false);
        }
        self.automatic = trigger == Trigger::Probe;
        if trigger == Trigger::Manual {
            self.suspended = false;
        }
        self.running = true;
        info!(phase = phase_label(self.phase), ?trigger, "stopwatch started");
        self.log(EventKind::Start, "")?;
        Ok(true)
    }

    /// Open an interruption. Starts the stopwatch first when it is stopped.
    pub fn pause(&mut self, comment: &str, trigger: Trigger) -> Result<bool> {
        if !self.accepts(trigger) {
            debug!(?trigger, "pause ignored under manual control");
            return Ok(false);
        }
        if !self.running {
            self.start(trigger)?;
        }
        self.take_control(trigger);
        if self.interruption.is_some() {
            return Ok(false);
        }
        self.interruption = Some(0);
        info!(phase = phase_label(self.phase), "interruption started");
        self.log(EventKind::Pausing, comment)?;
        Ok(true)
    }

    /// Close the open interruption, returning its length in seconds.
    pub fn resume(&mut self, comment: &str, trigger: Trigger) -> Result<Option<u64>> {
        if !self.accepts(trigger) {
            debug!(?trigger, "resume ignored under manual control");
            return Ok(None);
        }
        self.take_control(trigger);
        self.close_interruption(comment)
    }

    fn close_interruption(&mut self, comment: &str) -> Result<Option<u64>> {
        let Some(elapsed) = self.interruption.take() else {
            return Ok(None);
        };
        let note = if comment.is_empty() {
            format_duration(elapsed)
        } else {
            format!("{} ({})", comment, format_duration(elapsed))
        };
        info!(phase = phase_label(self.phase), elapsed, "interruption ended");
        self.log(EventKind::Resuming, note)?;
        Ok(Some(elapsed))
    }

    /// Halt ticking, closing any open interruption first.
    pub fn stop(&mut self, trigger: Trigger) -> Result<bool> {
        if !self.accepts(trigger) {
            return Ok(false);
        }
        self.take_control(trigger);
        if !self.running {
            return Ok(false);
        }
        self.close_interruption("")?;
        self.running = false;
        info!(phase = phase_label(self.phase), "stopwatch stopped");
        self.log(EventKind::Stop, "")?;
        Ok(true)
    }

    /// Stop and disable tracking until `resume_task`.
    pub fn suspend(&mut self) -> Result<()> {
        self.stop(Trigger::Manual)?;
        self.suspended = true;
        self.automatic = false;
        Ok(())
    }

    /// Hand tracking back to the probe and start ticking again.
    pub fn resume_task(&mut self) -> Result<()> {
        self.suspended = false;
        self.automatic = true;
        self.start(Trigger::Probe)?;
        Ok(())
    }

    /// Switch the current phase. Returns the previous phase.
    pub fn set_phase(&mut self, phase: Option<Phase>) -> Result<Option<Phase>> {
        let previous = self.phase;
        if previous == phase {
            return Ok(previous);
        }
        self.phase = phase;
        info!(from = phase_label(previous), to = phase_label(phase), "phase changed");
        self.log(EventKind::PhaseChange, phase_label(previous))?;
        Ok(previous)
    }

    /// Account one elapsed second.
    pub fn tick(&mut self, probe: &dyn ActivityProbe) -> TickOutcome {
        if !self.running || self.suspended {
            return TickOutcome::Ignored;
        }
        let field = if let Some(elapsed) = self.interruption.as_mut() {
            *elapsed += 1;
            TimeField::Interruption
        } else if probe.is_active() {
            TimeField::Actual
        } else {
            TimeField::OffTask
        };
        TickOutcome::Counted {
            phase: self.phase,
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::AlwaysActive;
    use crate::events::MemoryEventLog;

    fn controller() -> (StopwatchController, Arc<MemoryEventLog>) {
        let log = Arc::new(MemoryEventLog::new());
        let sw = StopwatchController::new(Some(Phase::Code), log.clone());
        (sw, log)
    }

    #[test]
    fn ticks_are_ignored_while_stopped() {
        let (mut sw, _) = controller();
        assert_eq!(sw.tick(&AlwaysActive), TickOutcome::Ignored);
    }

    #[test]
    fn start_is_idempotent() {
        let (mut sw, log) = controller();
        assert!(sw.start(Trigger::Manual).unwrap());
        assert!(!sw.start(Trigger::Manual).unwrap());
        assert_eq!(log.kinds(), vec![EventKind::Start]);
        assert_eq!(sw.state(), StopwatchState::Running);
    }

    #[test]
    fn interrupted_ticks_accumulate_interruption() {
        let (mut sw, _) = controller();
        sw.start(Trigger::Manual).unwrap();
        sw.pause("phone", Trigger::Manual).unwrap();
        assert_eq!(sw.state(), StopwatchState::Interrupted);
        for _ in 0..5 {
            assert_eq!(
                sw.tick(&AlwaysActive),
                TickOutcome::Counted {
                    phase: Some(Phase::Code),
                    field: TimeField::Interruption
                }
            );
        }
        assert_eq!(sw.interruption_elapsed(), Some(5));
        assert_eq!(sw.resume("done", Trigger::Manual).unwrap(), Some(5));
        assert_eq!(sw.interruption_elapsed(), None);
    }

    #[test]
    fn inactive_host_counts_off_task() {
        let (mut sw, _) = controller();
        sw.start(Trigger::Probe).unwrap();
        let idle = || false;
        assert_eq!(
            sw.tick(&idle),
            TickOutcome::Counted {
                phase: Some(Phase::Code),
                field: TimeField::OffTask
            }
        );
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let (mut sw, log) = controller();
        sw.start(Trigger::Manual).unwrap();
        assert!(sw.pause("", Trigger::Manual).unwrap());
        assert!(!sw.pause("", Trigger::Manual).unwrap());
        assert!(sw.resume("", Trigger::Manual).unwrap().is_some());
        assert!(sw.resume("", Trigger::Manual).unwrap().is_none());
        assert_eq!(
            log.kinds(),
            vec![EventKind::Start, EventKind::Pausing, EventKind::Resuming]
        );
    }

    #[test]
    fn stop_closes_open_interruption_first() {
        let (mut sw, log) = controller();
        sw.start(Trigger::Manual).unwrap();
        sw.pause("", Trigger::Manual).unwrap();
        sw.tick(&AlwaysActive);
        assert!(sw.stop(Trigger::Manual).unwrap());
        assert_eq!(sw.state(), StopwatchState::Stopped);
        assert_eq!(
            log.kinds(),
            vec![
                EventKind::Start,
                EventKind::Pausing,
                EventKind::Resuming,
                EventKind::Stop
            ]
        );
    }

    #[test]
    fn probe_cannot_override_manual_control() {
        let (mut sw, _) = controller();
        sw.start(Trigger::Probe).unwrap();
        assert!(sw.is_automatic());
        sw.pause("", Trigger::Manual).unwrap();
        assert!(!sw.is_automatic());
        // The probe sees activity again but must not end the manual pause.
        assert_eq!(sw.resume("", Trigger::Probe).unwrap(), None);
        assert_eq!(sw.state(), StopwatchState::Interrupted);
    }

    #[test]
    fn automatic_start_cannot_undo_manual_stop() {
        let (mut sw, log) = controller();
        sw.start(Trigger::Manual).unwrap();
        sw.stop(Trigger::Manual).unwrap();
        assert!(!sw.start(Trigger::Probe).unwrap());
        assert_eq!(sw.state(), StopwatchState::Stopped);
        assert!(!sw.is_automatic());
        assert_eq!(log.kinds(), vec![EventKind::Start, EventKind::Stop]);

        // Handing control back lets the probe drive again.
        sw.resume_task().unwrap();
        assert!(sw.is_running());
        assert!(sw.is_automatic());
    }

    #[test]
    fn suspended_task_ignores_ticks_and_probe_start() {
        let (mut sw, _) = controller();
        sw.start(Trigger::Probe).unwrap();
        sw.suspend().unwrap();
        assert!(!sw.start(Trigger::Probe).unwrap());
        assert_eq!(sw.tick(&AlwaysActive), TickOutcome::Ignored);

        sw.resume_task().unwrap();
        assert!(sw.is_running());
        assert!(matches!(sw.tick(&AlwaysActive), TickOutcome::Counted { .. }));
    }

    #[test]
    fn phase_change_is_logged_with_previous_phase() {
        let (mut sw, log) = controller();
        assert_eq!(sw.set_phase(Some(Phase::Test)).unwrap(), Some(Phase::Code));
        let events = log.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, Some(Phase::Test));
        assert_eq!(events[0].comment, "code");
    }
}
