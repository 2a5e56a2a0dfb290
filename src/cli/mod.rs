//! CLI command definitions for psp-metrics
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod export;

use clap::{Args, Parser, Subcommand};
use export::{ExportArgs, ImportArgs};
use std::path::PathBuf;

/// Personal Software Process metrics: phase time, defects and line provenance
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    /// Task to record against (overrides config)
    #[arg(short, long, global = true)]
    pub task: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    /// Output format: markdown (default) or json
    #[arg(short, long, default_value = "markdown", global = true)]
    pub format: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the plan summary (default if no subcommand given)
    Status,

    /// Set the plan estimate of a phase, e.g. `plan code 1.5h`
    Plan {
        phase: String,
        duration: String,
    },

    /// Show or change the current phase
    Phase(PhaseArgs),

    /// Track time interactively until stopped
    Run(RunArgs),

    /// Manage the defect recording log
    #[command(subcommand)]
    Defect(DefectCommand),

    /// Show which phase wrote each line of a file
    Provenance(ProvenanceArgs),

    /// Check the current phase and advance when complete
    Check(CheckArgs),

    /// Export the task's records to a JSON snapshot
    Export(ExportArgs),

    /// Import a JSON snapshot into the task
    Import(ImportArgs),
}

#[derive(Args, Debug)]
pub struct PhaseArgs {
    /// Phase to switch to
    #[arg(conflicts_with_all = ["next", "clear"])]
    pub phase: Option<String>,

    /// Advance to the next phase in workflow order
    #[arg(long, conflicts_with = "clear")]
    pub next: bool,

    /// Leave the workflow (no current phase)
    #[arg(long)]
    pub clear: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Files whose modification marks the developer as active; their
    /// provenance is refreshed on phase changes
    #[arg(short, long, value_name = "FILE")]
    pub watch: Vec<PathBuf>,

    /// Seconds without activity before time counts as off-task
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Start under manual control instead of probe-driven tracking
    #[arg(long)]
    pub manual: bool,
}

#[derive(Subcommand, Debug)]
pub enum DefectCommand {
    /// Record a defect
    Add(DefectAddArgs),

    /// List recorded defects
    List,

    /// Mark a defect fixed
    Check {
        /// Defect number or uuid
        defect: String,

        /// Mark as won't fix (clears the fix time)
        #[arg(long)]
        wontfix: bool,
    },

    /// Reopen a defect
    Uncheck {
        /// Defect number or uuid
        defect: String,
    },

    /// Overwrite defect fields, e.g. `edit 3 type=80 fix_time=5m`
    Edit {
        /// Defect number or uuid
        defect: String,

        /// field=value pairs; an empty value clears optional fields
        #[arg(value_parser = parse_key_val, required = true)]
        fields: Vec<(String, String)>,
    },

    /// Delete a defect
    Delete {
        /// Defect number or uuid
        defect: String,
    },

    /// Delete every defect of the task
    DeleteAll {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
pub struct DefectAddArgs {
    pub summary: String,

    /// Defect type code or name (default 20, syntax)
    #[arg(long = "type", value_name = "TYPE")]
    pub defect_type: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    /// Source file the defect was found in
    #[arg(long)]
    pub file: Option<String>,

    /// 1-based line number in `--file`
    #[arg(long)]
    pub line: Option<u32>,

    #[arg(long)]
    pub offset: Option<u32>,

    /// Injection phase; looked up from line provenance when omitted
    #[arg(long)]
    pub inject_phase: Option<String>,
}

#[derive(Args, Debug)]
pub struct ProvenanceArgs {
    pub file: PathBuf,

    /// Only report the phase of this 1-based line
    #[arg(long)]
    pub line: Option<usize>,

    /// Report line counts per phase
    #[arg(long, conflicts_with = "line")]
    pub counts: bool,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// JSON array of checker findings (`-` for stdin)
    #[arg(long, value_name = "FILE")]
    pub findings: Option<PathBuf>,
}

/// Parse a `field=value` pair.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got {:?}", s))?;
    Ok((key.trim().to_string(), value.to_string()))
}
