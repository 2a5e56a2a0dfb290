//! Core types for the PSP metrics engine.

use crate::error::PspError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Columns persisted for a defect record, in storage order.
pub const DEFECT_COLUMNS: &[&str] = &[
    "uuid",
    "number",
    "summary",
    "description",
    "date",
    "type",
    "inject_phase",
    "remove_phase",
    "fix_time",
    "fix_defect",
    "checked",
    "filename",
    "lineno",
    "offset",
];

/// Defect columns that may be overwritten by an edit.
pub const DEFECT_EDITABLE_FIELDS: &[&str] = &[
    "summary",
    "description",
    "type",
    "inject_phase",
    "remove_phase",
    "fix_time",
    "fix_defect",
];

/// Columns persisted for a per-phase time summary.
pub const TIME_SUMMARY_COLUMNS: &[&str] = &[
    "phase",
    "plan",
    "actual",
    "interruption",
    "off_task",
    "comments",
];

/// A stage of the fixed PSP workflow. Declaration order is workflow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planning,
    Design,
    Code,
    Review,
    Compile,
    Test,
    Postmortem,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Planning,
        Phase::Design,
        Phase::Code,
        Phase::Review,
        Phase::Compile,
        Phase::Test,
        Phase::Postmortem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Design => "design",
            Phase::Code => "code",
            Phase::Review => "review",
            Phase::Compile => "compile",
            Phase::Test => "test",
            Phase::Postmortem => "postmortem",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The phase that follows this one; `None` after postmortem.
    pub fn next(&self) -> Option<Phase> {
        Phase::ALL.get(self.index() + 1).copied()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = PspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Phase::ALL
            .iter()
            .copied()
            .find(|phase| phase.as_str() == wanted)
            .ok_or_else(|| PspError::UnknownPhase(s.to_string()))
    }
}

/// Label for an optional phase; the empty phase renders as an empty string.
pub fn phase_label(phase: Option<Phase>) -> &'static str {
    phase.map(|p| p.as_str()).unwrap_or("")
}

/// Parse an optional phase, treating blank input as the empty phase.
pub fn parse_optional_phase(s: &str) -> Result<Option<Phase>, PspError> {
    if s.trim().is_empty() {
        Ok(None)
    } else {
        s.parse().map(Some)
    }
}

/// Defect classification codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum DefectType {
    Documentation = 10,
    #[default]
    Syntax = 20,
    Build = 30,
    Assignment = 40,
    Interface = 50,
    Checking = 60,
    Data = 70,
    Function = 80,
    System = 90,
    Environment = 100,
}

impl DefectType {
    pub const ALL: [DefectType; 10] = [
        DefectType::Documentation,
        DefectType::Syntax,
        DefectType::Build,
        DefectType::Assignment,
        DefectType::Interface,
        DefectType::Checking,
        DefectType::Data,
        DefectType::Function,
        DefectType::System,
        DefectType::Environment,
    ];

    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn from_code(code: i64) -> Result<Self, PspError> {
        DefectType::ALL
            .iter()
            .copied()
            .find(|t| i64::from(t.code()) == code)
            .ok_or(PspError::UnknownDefectType(code))
    }

    pub fn label(&self) -> &'static str {
        match self {
            DefectType::Documentation => "Documentation",
            DefectType::Syntax => "Syntax",
            DefectType::Build => "Build",
            DefectType::Assignment => "Assignment",
            DefectType::Interface => "Interface",
            DefectType::Checking => "Checking",
            DefectType::Data => "Data",
            DefectType::Function => "Function",
            DefectType::System => "System",
            DefectType::Environment => "Environment",
        }
    }
}

impl From<DefectType> for u16 {
    fn from(t: DefectType) -> Self {
        t.code()
    }
}

impl TryFrom<u16> for DefectType {
    type Error = PspError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        DefectType::from_code(i64::from(code))
    }
}

impl FromStr for DefectType {
    type Err = PspError;

    /// Accepts either the numeric code or the label (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i64>() {
            return DefectType::from_code(code);
        }
        DefectType::ALL
            .iter()
            .copied()
            .find(|t| t.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| PspError::invalid_value("type", s))
    }
}

/// Counters kept per phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeField {
    Plan,
    Actual,
    Interruption,
    OffTask,
}

impl TimeField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeField::Plan => "plan",
            TimeField::Actual => "actual",
            TimeField::Interruption => "interruption",
            TimeField::OffTask => "off_task",
        }
    }
}

/// Message attached to a closed interruption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalComment {
    pub message: String,
    pub delta: u64,
}

/// Plan and actual totals for one phase, in whole seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSummary {
    #[serde(default)]
    pub plan: u64,
    #[serde(default)]
    pub actual: u64,
    #[serde(default)]
    pub interruption: u64,
    #[serde(default)]
    pub off_task: u64,
    #[serde(default)]
    pub comments: Vec<IntervalComment>,
}

impl TimeSummary {
    pub fn get(&self, field: TimeField) -> u64 {
        match field {
            TimeField::Plan => self.plan,
            TimeField::Actual => self.actual,
            TimeField::Interruption => self.interruption,
            TimeField::OffTask => self.off_task,
        }
    }

    /// Add one second to a counted field. `plan` is never auto-incremented.
    pub fn increment(&mut self, field: TimeField) {
        match field {
            TimeField::Plan => {}
            TimeField::Actual => self.actual += 1,
            TimeField::Interruption => self.interruption += 1,
            TimeField::OffTask => self.off_task += 1,
        }
    }

    /// Elapsed time (actual + interruption) against the plan estimate.
    pub fn progress(&self) -> Option<Progress> {
        if self.plan == 0 {
            return None;
        }
        let percent = (self.actual + self.interruption) * 100 / self.plan;
        let status = if percent < 75 {
            ProgressStatus::OnTrack
        } else if percent <= 100 {
            ProgressStatus::NearPlan
        } else {
            ProgressStatus::OverPlan
        };
        Some(Progress { percent, status })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    OnTrack,
    NearPlan,
    OverPlan,
}

/// Percentage of the plan consumed so far. May exceed 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub percent: u64,
    pub status: ProgressStatus,
}

/// Where a defect sits in the source tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    pub offset: Option<u32>,
}

impl Location {
    pub fn at(filename: impl Into<String>, lineno: u32) -> Self {
        Self {
            filename: Some(filename.into()),
            lineno: Some(lineno),
            offset: None,
        }
    }
}

/// A recorded defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defect {
    pub uuid: String,
    pub number: i64,
    pub summary: String,
    pub description: String,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub defect_type: DefectType,
    pub inject_phase: Option<Phase>,
    pub remove_phase: Option<Phase>,
    pub fix_time: Option<u64>,
    pub fix_defect: Option<i64>,
    pub checked: bool,
    #[serde(flatten)]
    pub location: Location,
}

/// Composite key two defects must share to be considered the same defect.
pub type DuplicateKey<'a> = (&'a str, NaiveDate, Option<&'a str>, Option<u32>, Option<u32>);

impl Defect {
    pub fn duplicate_key(&self) -> DuplicateKey<'_> {
        (
            &self.summary,
            self.date,
            self.location.filename.as_deref(),
            self.location.lineno,
            self.location.offset,
        )
    }

    /// Overwrite the editable fields present in `edit`.
    pub fn apply(&mut self, edit: DefectEdit) {
        if let Some(summary) = edit.summary {
            self.summary = summary;
        }
        if let Some(description) = edit.description {
            self.description = description;
        }
        if let Some(defect_type) = edit.defect_type {
            self.defect_type = defect_type;
        }
        if let Some(inject_phase) = edit.inject_phase {
            self.inject_phase = inject_phase;
        }
        if let Some(remove_phase) = edit.remove_phase {
            self.remove_phase = remove_phase;
        }
        if let Some(fix_time) = edit.fix_time {
            self.fix_time = fix_time;
        }
        if let Some(fix_defect) = edit.fix_defect {
            self.fix_defect = fix_defect;
        }
    }
}

/// Input for recording a defect. `number` is assigned when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDefect {
    pub number: Option<i64>,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    pub date: NaiveDate,
    #[serde(rename = "type", default)]
    pub defect_type: DefectType,
    pub inject_phase: Option<Phase>,
    pub remove_phase: Option<Phase>,
    pub fix_time: Option<u64>,
    pub fix_defect: Option<i64>,
    #[serde(default)]
    pub checked: bool,
    #[serde(flatten)]
    pub location: Location,
}

impl NewDefect {
    pub fn new(summary: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            number: None,
            summary: summary.into(),
            description: String::new(),
            date,
            defect_type: DefectType::default(),
            inject_phase: None,
            remove_phase: None,
            fix_time: Some(0),
            fix_defect: None,
            checked: false,
            location: Location::default(),
        }
    }

    pub fn duplicate_key(&self) -> DuplicateKey<'_> {
        (
            &self.summary,
            self.date,
            self.location.filename.as_deref(),
            self.location.lineno,
            self.location.offset,
        )
    }

    pub fn into_defect(self, uuid: String, number: i64) -> Defect {
        Defect {
            uuid,
            number,
            summary: self.summary,
            description: self.description,
            date: self.date,
            defect_type: self.defect_type,
            inject_phase: self.inject_phase,
            remove_phase: self.remove_phase,
            fix_time: self.fix_time,
            fix_defect: self.fix_defect,
            checked: self.checked,
            location: self.location,
        }
    }
}

impl From<Defect> for NewDefect {
    fn from(defect: Defect) -> Self {
        Self {
            number: Some(defect.number),
            summary: defect.summary,
            description: defect.description,
            date: defect.date,
            defect_type: defect.defect_type,
            inject_phase: defect.inject_phase,
            remove_phase: defect.remove_phase,
            fix_time: defect.fix_time,
            fix_defect: defect.fix_defect,
            checked: defect.checked,
            location: defect.location,
        }
    }
}

/// Field overwrites for an existing defect. Outer `None` leaves a field as is;
/// inner `None` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefectEdit {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub defect_type: Option<DefectType>,
    pub inject_phase: Option<Option<Phase>>,
    pub remove_phase: Option<Option<Phase>>,
    pub fix_time: Option<Option<u64>>,
    pub fix_defect: Option<Option<i64>>,
}

impl DefectEdit {
    /// Build an edit from `field=value` pairs. Field names must be listed in
    /// [`DEFECT_EDITABLE_FIELDS`]; an empty value clears optional fields.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, PspError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut edit = DefectEdit::default();
        for (field, value) in pairs {
            let field = field.trim();
            if !DEFECT_EDITABLE_FIELDS.contains(&field) {
                return Err(PspError::UnknownField(field.to_string()));
            }
            let value = value.trim();
            match field {
                "summary" => edit.summary = Some(value.to_string()),
                "description" => edit.description = Some(value.to_string()),
                "type" => edit.defect_type = Some(value.parse()?),
                "inject_phase" => edit.inject_phase = Some(parse_optional_phase(value)?),
                "remove_phase" => edit.remove_phase = Some(parse_optional_phase(value)?),
                "fix_time" => {
                    edit.fix_time = Some(if value.is_empty() {
                        None
                    } else {
                        Some(crate::format::parse_duration(value)?)
                    })
                }
                "fix_defect" => {
                    edit.fix_defect = Some(if value.is_empty() {
                        None
                    } else {
                        Some(
                            value
                                .parse::<i64>()
                                .map_err(|_| PspError::invalid_value(field, value))?,
                        )
                    })
                }
                _ => return Err(PspError::UnknownField(field.to_string())),
            }
        }
        Ok(edit)
    }

    pub fn is_empty(&self) -> bool {
        *self == DefectEdit::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_follow_workflow_order() {
        assert_eq!(Phase::Planning.next(), Some(Phase::Design));
        assert_eq!(Phase::Test.next(), Some(Phase::Postmortem));
        assert_eq!(Phase::Postmortem.next(), None);
        assert!(Phase::Code < Phase::Compile);
    }

    #[test]
    fn phase_parsing_is_case_insensitive() {
        assert_eq!(" Code ".parse::<Phase>().unwrap(), Phase::Code);
        assert!("coding".parse::<Phase>().is_err());
        assert_eq!(parse_optional_phase("").unwrap(), None);
    }

    #[test]
    fn defect_type_accepts_code_or_label() {
        assert_eq!("20".parse::<DefectType>().unwrap(), DefectType::Syntax);
        assert_eq!("function".parse::<DefectType>().unwrap(), DefectType::Function);
        assert!(DefectType::from_code(25).is_err());
    }

    #[test]
    fn unclassified_defects_are_syntax() {
        assert_eq!(DefectType::default(), DefectType::Syntax);
        assert_eq!(u16::from(DefectType::default()), 20);
    }

    #[test]
    fn progress_thresholds() {
        let mut summary = TimeSummary {
            plan: 100,
            actual: 50,
            interruption: 10,
            ..Default::default()
        };
        assert_eq!(summary.progress().unwrap().status, ProgressStatus::OnTrack);
        summary.actual = 90;
        assert_eq!(summary.progress().unwrap().status, ProgressStatus::NearPlan);
        summary.actual = 95;
        let progress = summary.progress().unwrap();
        assert_eq!(progress.percent, 105);
        assert_eq!(progress.status, ProgressStatus::OverPlan);
        summary.plan = 0;
        assert!(summary.progress().is_none());
    }

    #[test]
    fn plan_is_never_incremented() {
        let mut summary = TimeSummary::default();
        summary.increment(TimeField::Plan);
        summary.increment(TimeField::OffTask);
        assert_eq!(summary.plan, 0);
        assert_eq!(summary.off_task, 1);
    }

    #[test]
    fn edit_pairs_validate_field_names() {
        let edit = DefectEdit::from_pairs([("summary", "typo"), ("remove_phase", "")]).unwrap();
        assert_eq!(edit.summary.as_deref(), Some("typo"));
        assert_eq!(edit.remove_phase, Some(None));

        let err = DefectEdit::from_pairs([("uuid", "x")]).unwrap_err();
        assert!(matches!(err, PspError::UnknownField(_)));
    }
}
