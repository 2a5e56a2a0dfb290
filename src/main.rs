//! PSP Metrics
//!
//! Tracks time per development phase, records defects and attributes source
//! lines to the phase that wrote them.

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use psp_metrics::activity::FileActivityProbe;
use psp_metrics::cli::export::{ExportArgs, ImportArgs};
use psp_metrics::cli::{
    CheckArgs, Cli, Command, DefectAddArgs, DefectCommand, PhaseArgs, ProvenanceArgs, RunArgs,
};
use psp_metrics::config::Config;
use psp_metrics::db::Database;
use psp_metrics::error::ErrorReport;
use psp_metrics::events::{EventSink, FileEventLog};
use psp_metrics::export::{ImportMode, Snapshot};
use psp_metrics::format::{
    OutputFormat, format_defect_counts_markdown, format_defects_markdown, format_duration,
    format_phase_counts_markdown, format_plan_summary_markdown, format_provenance_markdown,
    parse_duration,
};
use psp_metrics::session::{Finding, SqliteSession};
use psp_metrics::stopwatch::{StopwatchState, Trigger};
use psp_metrics::types::{
    DefectEdit, DefectType, Location, NewDefect, Phase, parse_optional_phase, phase_label,
};
use serde::Serialize;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let format = OutputFormat::from_str(&cli.format)
        .ok_or_else(|| anyhow!("unknown output format {:?} (expected markdown or json)", cli.format))?;

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(db_path) = &cli.database {
        config.engine.db_path = db_path.clone();
    }
    if let Some(task) = &cli.task {
        config.engine.task = task.clone();
    }

    match run_command(&config, cli.command.unwrap_or(Command::Status), format).await {
        Ok(()) => Ok(()),
        Err(e) if format == OutputFormat::Json => {
            let report = json!({ "error": ErrorReport::from_anyhow(&e) });
            println!("{}", serde_json::to_string_pretty(&report)?);
            std::process::exit(1);
        }
        Err(e) => Err(e),
    }
}

fn open_session(config: &Config) -> Result<SqliteSession> {
    config.ensure_dirs()?;
    let db = Database::open(&config.engine.db_path)
        .with_context(|| format!("opening database {}", config.engine.db_path.display()))?;
    let events: Arc<dyn EventSink> = Arc::new(FileEventLog::open(&config.engine.event_log)?);
    debug!(task = %config.engine.task, db = %config.engine.db_path.display(), "session opened");
    SqliteSession::open(db, &config.engine.task, &config.engine.metadata_dir, events)
}

/// Print `value` as JSON, or the markdown rendering.
fn emit<T, F>(format: OutputFormat, value: &T, markdown: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce() -> String,
{
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Markdown => print!("{}", markdown()),
    }
    Ok(())
}

async fn run_command(config: &Config, command: Command, format: OutputFormat) -> Result<()> {
    let mut session = open_session(config)?;

    match command {
        Command::Status => show_status(&session, format),
        Command::Plan { phase, duration } => {
            let phase: Phase = phase.parse()?;
            let seconds = parse_duration(&duration)?;
            let summary = session.tracker_mut().set_plan(phase, seconds)?;
            emit(format, &json!({ "phase": phase, "summary": summary }), || {
                format!("Plan for {} set to {}\n", phase, format_duration(seconds))
            })
        }
        Command::Phase(args) => run_phase(&mut session, args, format),
        Command::Run(args) => run_loop(&mut session, args, config, format).await,
        Command::Defect(command) => run_defect(&mut session, command, format),
        Command::Provenance(args) => run_provenance(&mut session, args, format),
        Command::Check(args) => run_check(&mut session, args, format),
        Command::Export(args) => run_export(&session, args),
        Command::Import(args) => run_import(&mut session, args, format),
    }
}

fn show_status(session: &SqliteSession, format: OutputFormat) -> Result<()> {
    let summaries = session.tracker().all()?;
    let counts = session.defects().counts()?;
    let value = json!({
        "task": session.task(),
        "current_phase": session.phase(),
        "time_summaries": summaries,
        "defect_counts": counts,
    });
    emit(format, &value, || {
        let mut md = format!("Task: {}\n\n", session.task());
        md.push_str(&format_plan_summary_markdown(&summaries, session.phase()));
        if !counts.is_empty() {
            md.push_str("\n## Defects per phase\n\n");
            md.push_str(&format_defect_counts_markdown(&counts));
        }
        md
    })
}

fn run_phase(session: &mut SqliteSession, args: PhaseArgs, format: OutputFormat) -> Result<()> {
    let previous = session.phase();
    if args.next {
        session.next_phase()?;
    } else if args.clear {
        session.set_phase(None)?;
    } else if let Some(phase) = args.phase {
        session.set_phase(Some(phase.parse()?))?;
    }
    let current = session.phase();
    emit(
        format,
        &json!({ "previous": previous, "current": current }),
        || {
            if previous == current {
                format!("Current phase: {}\n", phase_label(current))
            } else {
                format!(
                    "Phase changed: {} -> {}\n",
                    phase_label(previous),
                    phase_label(current)
                )
            }
        },
    )
}

fn new_defect(session: &SqliteSession, args: DefectAddArgs) -> Result<NewDefect> {
    let mut item = NewDefect::new(args.summary, chrono::Local::now().date_naive());
    if let Some(defect_type) = args.defect_type {
        item.defect_type = defect_type.parse::<DefectType>()?;
    }
    item.description = args.description.unwrap_or_default();
    if let Some(phase) = args.inject_phase {
        item.inject_phase = parse_optional_phase(&phase)?;
    }
    item.location = Location {
        filename: args.file,
        lineno: args.line,
        offset: args.offset,
    };
    debug!(phase = phase_label(session.phase()), "recording defect");
    Ok(item)
}

fn run_defect(session: &mut SqliteSession, command: DefectCommand, format: OutputFormat) -> Result<()> {
    match command {
        DefectCommand::Add(args) => {
            let item = new_defect(session, args)?;
            let outcome = session.record_defect(item)?;
            let defect = session.defects().resolve(outcome.key())?;
            emit(
                format,
                &json!({ "duplicate": outcome.is_duplicate(), "defect": defect }),
                || {
                    if outcome.is_duplicate() {
                        format!("Defect #{} already recorded\n", defect.number)
                    } else {
                        format!(
                            "Recorded defect #{} (injected in {})\n",
                            defect.number,
                            phase_label(defect.inject_phase)
                        )
                    }
                },
            )
        }
        DefectCommand::List => {
            let defects = session.defects().list()?;
            emit(format, &defects, || format_defects_markdown(&defects))
        }
        DefectCommand::Check { defect, wontfix } => {
            let changed = session.check_defect(&defect, true, wontfix)?;
            let defect = session.defects().resolve(&defect)?;
            emit(format, &json!({ "changed": changed, "defect": defect }), || {
                format!(
                    "Defect #{} {} (removed in {})\n",
                    defect.number,
                    if wontfix { "marked won't fix" } else { "fixed" },
                    phase_label(defect.remove_phase)
                )
            })
        }
        DefectCommand::Uncheck { defect } => {
            let changed = session.check_defect(&defect, false, false)?;
            let defect = session.defects().resolve(&defect)?;
            emit(format, &json!({ "changed": changed, "defect": defect }), || {
                format!("Defect #{} reopened\n", defect.number)
            })
        }
        DefectCommand::Edit { defect, fields } => {
            let edit = DefectEdit::from_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
            let key = session.defects().resolve(&defect)?.uuid;
            let defect = session.defects_mut().edit(&key, edit)?;
            emit(format, &defect, || format!("Defect #{} updated\n", defect.number))
        }
        DefectCommand::Delete { defect } => {
            let defect = session.defects().resolve(&defect)?;
            let phase = session.phase();
            session.defects_mut().delete(&defect.uuid, phase)?;
            emit(format, &json!({ "deleted": defect.number }), || {
                format!("Defect #{} deleted\n", defect.number)
            })
        }
        DefectCommand::DeleteAll { yes } => {
            if !yes {
                bail!("refusing to delete all defects without --yes");
            }
            let phase = session.phase();
            let count = session.defects_mut().delete_all(phase)?;
            emit(format, &json!({ "deleted": count }), || {
                format!("Deleted {} defects\n", count)
            })
        }
    }
}

fn run_provenance(session: &mut SqliteSession, args: ProvenanceArgs, format: OutputFormat) -> Result<()> {
    let phase = session.phase();
    let path = args.file.display().to_string();
    if let Some(line) = args.line {
        let injected = session.provenance_mut().phase_at(&args.file, line, phase)?;
        return emit(
            format,
            &json!({ "file": path, "line": line, "phase": injected }),
            || format!("{}:{} {}\n", path, line, phase_label(injected)),
        );
    }
    if args.counts {
        let counts = session.provenance_mut().phase_counts(&args.file, phase)?;
        let value: Vec<_> = counts
            .iter()
            .map(|(phase, lines)| json!({ "phase": phase, "lines": lines }))
            .collect();
        return emit(format, &value, || format_phase_counts_markdown(&counts));
    }
    let lines = session.provenance_mut().lines(&args.file, phase)?.to_vec();
    emit(format, &lines, || format_provenance_markdown(&path, &lines))
}

fn read_findings(args: &CheckArgs) -> Result<Vec<Finding>> {
    let Some(source) = &args.findings else {
        return Ok(Vec::new());
    };
    let mut data = String::new();
    if source.as_os_str() == "-" {
        std::io::stdin().read_to_string(&mut data)?;
    } else {
        data = std::fs::read_to_string(source)
            .with_context(|| format!("reading findings {}", source.display()))?;
    }
    Ok(serde_json::from_str(&data).context("parsing findings")?)
}

fn run_check(session: &mut SqliteSession, args: CheckArgs, format: OutputFormat) -> Result<()> {
    let findings = read_findings(&args)?;
    let check = session.check_phase(findings)?;
    emit(format, &check, || {
        let mut md = String::new();
        for error in &check.errors {
            md.push_str(&format!("- {}\n", error));
        }
        if let Some(next) = check.advanced_to {
            md.push_str(&format!(
                "Phase {} complete, now in {}\n",
                phase_label(check.phase),
                phase_label(next)
            ));
        }
        md
    })
}

fn run_export(session: &SqliteSession, args: ExportArgs) -> Result<()> {
    let snapshot = Snapshot::capture(
        session.task(),
        session.phase(),
        session.tracker(),
        session.defects(),
    )?;
    let size = snapshot.to_json_pretty()?.len() as u64;
    let compression = args.compression(size);
    debug!(bytes = size, ?compression, "writing snapshot");
    let gzip = compression.is_gzip();

    if let Some(ref path) = args.output {
        let file = std::fs::File::create(path)?;
        snapshot.write_to(file, gzip)?;
        eprintln!(
            "Exported to {}{}",
            path.display(),
            if gzip { " (gzipped)" } else { "" }
        );
    } else {
        let stdout = std::io::stdout();
        snapshot.write_to(stdout.lock(), gzip)?;
    }
    Ok(())
}

fn run_import(session: &mut SqliteSession, args: ImportArgs, format: OutputFormat) -> Result<()> {
    let snapshot = Snapshot::from_file(&args.file)
        .with_context(|| format!("reading snapshot {}", args.file.display()))?;
    let mode = if args.replace {
        ImportMode::Replace
    } else {
        ImportMode::Merge
    };
    let summary = session.import_snapshot(&snapshot, mode)?;
    if args.with_phase {
        session.set_phase(snapshot.current_phase)?;
    }
    emit(format, &summary, || {
        format!(
            "Imported {} defects and {} time summaries\n",
            summary.defects, summary.time_summaries
        )
    })
}

const RUN_HELP: &str = "\
commands:
  pause [comment]     start an interruption
  resume [comment]    end the interruption (comment goes to the time log)
  start               start the stopwatch under manual control
  stop                stop and leave
  phase <name>|next   change phase
  fix <defect>        accumulate repair time on a defect
  check <defect>      mark a defect fixed
  suspend             stop tracking until `continue`
  continue            hand tracking back to the activity probe
  status              show the plan summary
  help                this text
";

enum Control {
    Continue,
    Quit,
}

/// Handle one line typed at the `run` prompt.
fn run_input(session: &mut SqliteSession, line: &str) -> Result<Control> {
    let line = line.trim();
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match verb {
        "" => {}
        "pause" => {
            session.pause(rest, Trigger::Manual)?;
        }
        "resume" => {
            if let Some(elapsed) = session.resume(rest, Trigger::Manual)? {
                println!("Interruption: {}", format_duration(elapsed));
            }
        }
        "start" => {
            session.start(Trigger::Manual)?;
        }
        "stop" | "quit" | "exit" => return Ok(Control::Quit),
        "phase" if rest == "next" => {
            let next = session.next_phase()?;
            println!("Phase: {}", phase_label(next));
        }
        "phase" => {
            session.set_phase(parse_optional_phase(rest)?)?;
            println!("Phase: {}", phase_label(session.phase()));
        }
        "fix" => {
            let defect = session.select_defect(rest)?;
            println!("Fixing defect #{}: {}", defect.number, defect.summary);
        }
        "check" => {
            session.check_defect(rest, true, false)?;
        }
        "suspend" => session.suspend()?,
        "continue" => session.resume_task()?,
        "status" => {
            let summaries = session.tracker().all()?;
            print!("{}", format_plan_summary_markdown(&summaries, session.phase()));
        }
        "help" => print!("{}", RUN_HELP),
        other => println!("unknown command {:?} (try `help`)", other),
    }
    Ok(Control::Continue)
}

/// Tick the stopwatch once per second, taking commands from stdin, until
/// `stop`, end of input with the stopwatch stopped, or Ctrl-C.
async fn run_loop(
    session: &mut SqliteSession,
    args: RunArgs,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let idle_after = Duration::from_secs(args.idle_timeout.unwrap_or(config.engine.idle_timeout_seconds));
    let probe = FileActivityProbe::new(args.watch.clone(), idle_after);

    let phase = session.phase();
    for path in &args.watch {
        if let Err(e) = session.provenance_mut().refresh(path, phase) {
            warn!(file = %path.display(), error = %e, "cannot track provenance");
        }
    }

    if args.manual {
        session.start(Trigger::Manual)?;
    } else {
        session.activate_task()?;
    }
    info!(
        task = %session.task(),
        phase = phase_label(phase),
        watched = args.watch.len(),
        idle_secs = idle_after.as_secs(),
        "tracking started"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    // The first tick completes immediately.
    ticker.tick().await;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                session.tick(&probe)?;
            }
            line = stdin.next_line(), if stdin_open => {
                match line? {
                    Some(line) => match run_input(session, &line) {
                        Ok(Control::Quit) => break,
                        Ok(Control::Continue) => {}
                        Err(e) => eprintln!("error: {:#}", e),
                    },
                    None => {
                        debug!("stdin closed");
                        stdin_open = false;
                        if session.stopwatch().state() == StopwatchState::Stopped {
                            break;
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    session.stop(Trigger::Manual)?;
    let phase = session.phase();
    session.provenance_mut().refresh_all(phase)?;
    show_status(session, format)
}
