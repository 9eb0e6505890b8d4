//! Text commands typed into the command line (`:status`, `:abandon`, ...).

use std::path::PathBuf;

use itertools::Itertools;

use crate::export::ExportRecord;
use crate::history::RunSummary;
use crate::host::Host;
use crate::store::RunStore;
use crate::timer::{format_clock, Remaining};
use crate::tracker::{Phase, Status, Tracker};
use crate::ui::{DisplayState, Visibility};

pub const HELP: &str = "commands: show, hide, toggle, status, abandon, reset, export [path], restore, help";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Show,
    Hide,
    Toggle,
    Status,
    Abandon,
    Reset,
    Export(Option<PathBuf>),
    Restore,
    Help,
    Unknown(String),
}

impl Command {
    /// Case-insensitive; a leading `/` or `:` is ignored.
    pub fn parse(text: &str) -> Self {
        let text = text.trim().trim_start_matches(['/', ':']);
        let mut words = text.split_whitespace();
        let Some(verb) = words.next() else {
            return Command::Help;
        };

        match verb.to_ascii_lowercase().as_str() {
            "show" => Command::Show,
            "hide" => Command::Hide,
            "toggle" => Command::Toggle,
            "status" => Command::Status,
            "abandon" => Command::Abandon,
            "reset" => Command::Reset,
            "export" => Command::Export(words.next().map(PathBuf::from)),
            "restore" => Command::Restore,
            "help" | "?" => Command::Help,
            _ => Command::Unknown(verb.to_string()),
        }
    }
}

/// Run a command and return the reply for the user.
pub fn execute<H: Host, S: RunStore>(
    command: Command,
    tracker: &mut Tracker<H, S>,
    display: &mut DisplayState,
) -> String {
    tracing::debug!(?command, "Command");

    match command {
        Command::Show => {
            display.visibility = Visibility::Shown;
            "display shown".to_string()
        }
        Command::Hide => {
            display.visibility = Visibility::Hidden;
            "display hidden".to_string()
        }
        Command::Toggle => {
            display.toggle(tracker.is_tracking());
            format!("display {}", display.visibility)
        }
        Command::Status => status_report(&tracker.tick()),
        Command::Abandon => match tracker.abandon() {
            Ok(_) => "run abandoned".to_string(),
            Err(rejected) => format!("cannot abandon: {rejected}"),
        },
        Command::Reset => match tracker.reset() {
            Ok(_) => "run reset".to_string(),
            Err(rejected) => format!("reset: {rejected}"),
        },
        Command::Export(path) => export(tracker, path),
        Command::Restore => match tracker.recover() {
            Ok(()) => status_report(&tracker.tick()),
            Err(rejected) => format!("cannot restore: {rejected}"),
        },
        Command::Help => HELP.to_string(),
        Command::Unknown(verb) => format!("unknown command '{verb}'. {HELP}"),
    }
}

/// Export the live run, or the most recent finished one while idle.
fn export<H: Host, S: RunStore>(tracker: &Tracker<H, S>, path: Option<PathBuf>) -> String {
    let now = tracker.host().now();
    let record = match tracker.key() {
        Some(key) if tracker.is_tracking() => Some(ExportRecord::from_timeline(key, tracker.timeline(), now)),
        _ => tracker
            .history()
            .runs()
            .last()
            .and_then(|summary| ExportRecord::from_summary(summary, now)),
    };

    let Some(record) = record else {
        return "nothing to export".to_string();
    };

    match record.write_to(path.as_deref()) {
        Ok(written) => format!("exported to {}", written.display()),
        Err(error) => {
            tracing::error!(export_error = %error, "Export failed");
            format!("export failed: {error}")
        }
    }
}

/// One-line text summary of a finished run.
pub fn run_line(summary: &RunSummary) -> String {
    let identity = summary
        .key
        .map(|key| format!("+{} (variant {})", key.level, key.variant_id))
        .unwrap_or_else(|| "run".to_string());
    format!(
        "{identity}: {reason} after {elapsed}, {deaths} deaths, {bosses} bosses, {verdict}",
        reason = summary.stats.end_reason,
        elapsed = format_clock(summary.stats.elapsed_seconds),
        deaths = summary.stats.death_count,
        bosses = summary.stats.milestones.len(),
        verdict = summary.stats.verdict,
    )
}

/// One-line text summary of the live run.
pub fn status_report(status: &Status) -> String {
    if status.phase != Phase::Active {
        return "not tracking".to_string();
    }

    let identity = status
        .key
        .map(|key| format!("+{} (variant {})", key.level, key.variant_id))
        .unwrap_or_else(|| "run".to_string());
    let remaining = match status.remaining {
        Remaining::Untimed => "untimed".to_string(),
        Remaining::Seconds(seconds) => format!("{} left", format_clock(seconds)),
    };
    let bosses = if status.milestones.is_empty() {
        "none".to_string()
    } else {
        status.milestones.iter().join(", ")
    };

    format!(
        "{identity}: {verdict}, {elapsed} elapsed, {remaining}, {deaths} deaths (-{penalty}), bosses: {bosses}",
        verdict = status.verdict,
        elapsed = format_clock(status.elapsed_seconds),
        deaths = status.death_count,
        penalty = format_clock(status.penalty_seconds),
    )
}
