//! Duration parsing/formatting and markdown rendering of reports.

use crate::defects::PhaseDefectCounts;
use crate::error::{PspError, PspResult};
use crate::provenance::LineRecord;
use crate::types::{Defect, Phase, ProgressStatus, TimeSummary, phase_label};
use heck::ToTitleCase;
use std::collections::BTreeMap;

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Markdown,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "markdown" | "md" => Some(OutputFormat::Markdown),
            _ => None,
        }
    }
}

const UNITS: [(u64, &str); 3] = [(1, "s"), (60, "m"), (3600, "h")];

/// Render a count of seconds in the largest unit that keeps the magnitude
/// under 60 (hours otherwise). Fractions are shown only when the count is
/// not a whole number of that unit.
pub fn format_duration(seconds: u64) -> String {
    let (factor, unit) = UNITS
        .iter()
        .copied()
        .find(|(factor, _)| seconds < 60 * factor)
        .unwrap_or(UNITS[UNITS.len() - 1]);
    if seconds % factor != 0 {
        format!("{:.2} {}", seconds as f64 / factor as f64, unit)
    } else {
        format!("{} {}", seconds / factor, unit)
    }
}

/// Parse user input such as `90`, `1.5m`, `2 h` or `1,5 m` into seconds.
///
/// Empty input is zero. A non-numeric amount and an unrecognized unit are
/// reported as distinct validation errors.
pub fn parse_duration(input: &str) -> PspResult<u64> {
    let input = input.trim().to_lowercase();
    if input.is_empty() {
        return Ok(0);
    }

    let invalid = || PspError::InvalidDuration {
        input: input.clone(),
    };

    let (amount, unit) = if input.contains(' ') {
        let mut parts = input.split_whitespace();
        let amount = parts.next().unwrap_or_default();
        let unit = parts.next().unwrap_or_default();
        if parts.next().is_some() {
            return Err(invalid());
        }
        (amount, unit)
    } else {
        match input.char_indices().last() {
            Some((idx, c)) if !c.is_ascii_digit() => (&input[..idx], &input[idx..]),
            _ => (input.as_str(), ""),
        }
    };

    let factor = unit_factor(unit)?;
    let value: f64 = amount.replace(',', ".").parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok((value * factor as f64).round() as u64)
}

fn unit_factor(unit: &str) -> PspResult<u64> {
    match unit {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Ok(1),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(60),
        "h" | "hr" | "hrs" | "hour" | "hours" => Ok(3600),
        other => Err(PspError::UnknownUnit {
            unit: other.to_string(),
        }),
    }
}

fn phase_title(phase: Phase) -> String {
    phase.as_str().to_title_case()
}

/// Format the plan summary as a markdown table, one row per phase.
pub fn format_plan_summary_markdown(
    summaries: &BTreeMap<Phase, TimeSummary>,
    current: Option<Phase>,
) -> String {
    let mut md = String::new();

    md.push_str("# Plan Summary\n\n");
    md.push_str(&format!(
        "Current phase: {}\n\n",
        current.map(phase_title).unwrap_or_else(|| "-".to_string())
    ));
    md.push_str("| Phase | Plan | Actual | Interruption | Off task | Progress | Comments |\n");
    md.push_str("|---|---|---|---|---|---|---|\n");

    let empty = TimeSummary::default();
    for phase in Phase::ALL {
        let summary = summaries.get(&phase).unwrap_or(&empty);
        let marker = if current == Some(phase) { "**" } else { "" };
        let progress = summary
            .progress()
            .map(|p| {
                let flag = match p.status {
                    ProgressStatus::OnTrack => "",
                    ProgressStatus::NearPlan => " (near plan)",
                    ProgressStatus::OverPlan => " (over plan)",
                };
                format!("{} %{}", p.percent, flag)
            })
            .unwrap_or_default();
        let comments = summary
            .comments
            .iter()
            .map(|c| format!("{} {}", c.message, format_duration(c.delta)))
            .collect::<Vec<_>>()
            .join("; ");

        md.push_str(&format!(
            "| {}{}{} | {} | {} | {} | {} | {} | {} |\n",
            marker,
            phase_title(phase),
            marker,
            format_duration(summary.plan),
            format_duration(summary.actual),
            format_duration(summary.interruption),
            format_duration(summary.off_task),
            progress,
            comments,
        ));
    }

    md
}

/// Format the defect recording log as markdown.
pub fn format_defects_markdown(defects: &[Defect]) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Defects ({})\n\n", defects.len()));

    for defect in defects {
        let check = if defect.checked { "x" } else { " " };
        md.push_str(&format!(
            "- [{}] **#{}** {} ({})\n",
            check,
            defect.number,
            defect.summary,
            defect.defect_type.label()
        ));
        md.push_str(&format!(
            "  - injected: {} / removed: {}\n",
            phase_label(defect.inject_phase),
            phase_label(defect.remove_phase)
        ));
        if let Some(fix_time) = defect.fix_time {
            md.push_str(&format!("  - fix time: {}\n", format_duration(fix_time)));
        }
        if let Some(fix_defect) = defect.fix_defect {
            md.push_str(&format!("  - fix defect: #{}\n", fix_defect));
        }
        if let Some(ref filename) = defect.location.filename {
            let lineno = defect
                .location
                .lineno
                .map(|l| format!(":{}", l))
                .unwrap_or_default();
            md.push_str(&format!("  - at: `{}{}`\n", filename, lineno));
        }
        if !defect.description.is_empty() {
            md.push_str(&format!("  - {}\n", defect.description));
        }
    }

    md
}

/// Format per-line provenance of a file.
pub fn format_provenance_markdown(path: &str, lines: &[LineRecord]) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Provenance: {}\n\n```\n", path));
    for line in lines {
        md.push_str(&format!("{:>10} - {}\n", phase_label(line.phase), line.text));
    }
    md.push_str("```\n");

    md
}

/// Format line counts per phase.
pub fn format_phase_counts_markdown(counts: &BTreeMap<Option<Phase>, usize>) -> String {
    let mut md = String::from("| Phase | Lines |\n|---|---|\n");
    for (phase, count) in counts {
        let label = phase.map(phase_title).unwrap_or_else(|| "(none)".to_string());
        md.push_str(&format!("| {} | {} |\n", label, count));
    }
    md
}

/// Format injected/removed defect counts per phase.
pub fn format_defect_counts_markdown(counts: &BTreeMap<Phase, PhaseDefectCounts>) -> String {
    let mut md = String::from("| Phase | Injected | Removed |\n|---|---|---|\n");
    for (phase, c) in counts {
        md.push_str(&format!("| {} | {} | {} |\n", phase_title(*phase), c.injected, c.removed));
    }
    md
}
