use std::{
    error::Error,
    fs::{File, OpenOptions},
    io::{self, stdin, BufRead, BufReader},
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use tracing_subscriber::EnvFilter;

use keyline::{
    app::App,
    app_dirs::AppDirs,
    combat_log::{decode_line, resolve_log_path, CombatLogHost, LogTail},
    commands::{run_line, status_report},
    config::{ConfigStore, FileConfigStore, Settings},
    export::ExportRecord,
    history::AggregateStatistics,
    host::{Host, HostSignal},
    runtime::{Cadence, CrosstermEventSource, EventSource, FixedTicker, Runner, Ticker},
    store::{RunStore, SqliteStore},
    timer::format_clock,
    tracker::Tracker,
};

/// live timeline for timed dungeon runs
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Follows the combat log of a timed dungeon run and shows, live, whether the key is still timeable: deaths, boss kills and the time they cost."
)]
pub struct Cli {
    #[clap(subcommand)]
    command: Commands,

    /// config file to use instead of the default one
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// run database to use instead of the default one
    #[clap(long, global = true)]
    db: Option<PathBuf>,

    /// seconds lost per death, for this invocation
    #[clap(long, global = true)]
    penalty: Option<f64>,

    /// remaining-time fraction at or above which a run is timeable
    #[clap(long, global = true)]
    timeable: Option<f64>,

    /// remaining-time fraction at or above which a run is borderline
    #[clap(long, global = true)]
    borderline: Option<f64>,

    /// verbose logging
    #[clap(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Commands {
    /// follow a live combat log in the terminal UI
    Watch {
        /// combat log file, or the game folder holding Logs/
        log: PathBuf,
    },
    /// run a finished combat log through the tracker and print each step
    Replay {
        log: PathBuf,
        /// store the replayed runs in the run database
        #[clap(long)]
        record: bool,
    },
    /// show the saved in-progress run and overall statistics
    Status,
    /// list finished runs
    History {
        /// write CSV instead of text
        #[clap(long)]
        csv: bool,
        /// number of most recent runs to show
        #[clap(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// show overall statistics
    Stats,
    /// export the most recent finished run as JSON
    Export { path: Option<PathBuf> },
    /// discard the saved in-progress run
    Reset,
    /// check whether the saved run can be resumed from a combat log
    Restore { log: PathBuf },
    /// show or change settings
    Config {
        #[clap(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum ConfigAction {
    /// set one setting, e.g. `penalty_seconds 15`
    Set { key: String, value: String },
    /// print where the config file lives
    Path,
}

impl Cli {
    fn config_store(&self) -> FileConfigStore {
        self.config
            .as_ref()
            .map(FileConfigStore::with_path)
            .unwrap_or_default()
    }

    /// Saved settings with this invocation's flags applied on top.
    fn settings(&self, saved: Settings) -> Settings {
        let mut settings = saved;
        if let Some(penalty) = self.penalty {
            settings.penalty_seconds = penalty;
        }
        if let Some(timeable) = self.timeable {
            settings.timeable_fraction = timeable;
        }
        if let Some(borderline) = self.borderline {
            settings.borderline_fraction = borderline;
        }
        settings.debug |= self.debug;
        settings.sanitized()
    }

    fn open_store(&self) -> keyline::error::Result<SqliteStore> {
        match &self.db {
            Some(path) => SqliteStore::open(path),
            None => SqliteStore::open_default(),
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_store = cli.config_store();
    let settings = cli.settings(config_store.load());

    let tui = matches!(cli.command, Commands::Watch { .. });
    init_tracing(settings.debug, tui);

    match &cli.command {
        Commands::Watch { log } => watch(log, settings, cli.open_store()?),
        Commands::Replay { log, record } => {
            let store = if *record {
                cli.open_store()?
            } else {
                SqliteStore::open_in_memory()?
            };
            replay(log, settings, store)
        }
        Commands::Status => {
            let store = cli.open_store()?;
            match store.load_inflight()? {
                Some(snapshot) => println!(
                    "saved run: +{} (variant {}), {} elapsed, {} deaths, {} bosses",
                    snapshot.key.level,
                    snapshot.key.variant_id,
                    format_clock(snapshot.timeline.elapsed_seconds(snapshot.saved_at)),
                    snapshot.timeline.failure_count(),
                    snapshot.timeline.milestone_events.len(),
                ),
                None => println!("no run in progress"),
            }
            print_stats(&store.load_stats()?);
            Ok(())
        }
        Commands::History { csv, limit } => {
            let store = cli.open_store()?;
            let history = keyline::history::RunHistory::with_contents(
                store.load_stats()?,
                store.load_history(*limit)?,
                (*limit).max(1),
            );
            if *csv {
                history.write_csv(io::stdout())?;
            } else if history.is_empty() {
                println!("no finished runs");
            } else {
                for run in history.runs() {
                    println!("{}", run_line(run));
                }
            }
            Ok(())
        }
        Commands::Stats => {
            print_stats(&cli.open_store()?.load_stats()?);
            Ok(())
        }
        Commands::Export { path } => {
            let store = cli.open_store()?;
            let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
            let record = store
                .load_history(1)?
                .last()
                .and_then(|summary| ExportRecord::from_summary(summary, now));
            match record {
                Some(record) => println!("exported to {}", record.write_to(path.as_deref())?.display()),
                None => println!("nothing to export"),
            }
            Ok(())
        }
        Commands::Reset => {
            let store = cli.open_store()?;
            if store.load_inflight()?.is_some() {
                store.clear_inflight()?;
                println!("saved run discarded");
            } else {
                println!("nothing to reset");
            }
            Ok(())
        }
        Commands::Restore { log } => {
            let (mut tracker, _) = primed_tracker(log, settings, cli.open_store()?)?;
            match tracker.recover() {
                Ok(()) => println!("{}", status_report(&tracker.tick())),
                Err(rejected) => println!("cannot restore: {rejected}"),
            }
            Ok(())
        }
        Commands::Config { action } => {
            match action {
                None => println!("{}", serde_json::to_string_pretty(&settings)?),
                Some(ConfigAction::Path) => println!("{}", config_store.path().display()),
                Some(ConfigAction::Set { key, value }) => {
                    let mut saved = config_store.load();
                    saved.set(key, value)?;
                    config_store.save(&saved)?;
                    println!("{key} = {value}");
                }
            }
            Ok(())
        }
    }
}

/// `RUST_LOG` wins, else `info` (or `debug`). The TUI owns the terminal, so
/// it logs to the state-dir log file instead of stderr.
fn init_tracing(debug: bool, tui: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if !tui {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
        return;
    }

    let log_file = AppDirs::log_path().and_then(|path| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok()?;
        }
        OpenOptions::new().create(true).append(true).open(path).ok()
    });
    match log_file {
        Some(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::sink)
                .try_init();
        }
    }
}

fn print_stats(stats: &AggregateStatistics) {
    let best = if stats.best_time_seconds > 0.0 {
        format_clock(stats.best_time_seconds)
    } else {
        "--:--".to_string()
    };
    println!(
        "runs {}  deaths {}  deaths/run {:.2}  best {}",
        stats.total_runs, stats.total_failures, stats.average_failures, best
    );
}

/// Read the whole log into a following host so it knows whether a run is
/// in progress, without replaying old signals into the tracker. Returns the
/// tail positioned at the end of what was read.
fn primed_tracker(
    log: &Path,
    settings: Settings,
    store: SqliteStore,
) -> Result<(Tracker<CombatLogHost, SqliteStore>, LogTail), Box<dyn Error>> {
    let path = resolve_log_path(log)?
        .ok_or_else(|| format!("no combat log found at {}", log.display()))?;

    let mut host = CombatLogHost::following();
    let mut tail = LogTail::from_start(&path);
    for line in tail.read_new_lines()? {
        host.consume_line(&line);
    }
    tracing::info!(path = %path.display(), lines = host.lines_seen(), "Primed host from combat log");

    Ok((Tracker::new(host, store, settings)?, tail))
}

fn watch(log: &Path, settings: Settings, store: SqliteStore) -> Result<(), Box<dyn Error>> {
    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let (mut tracker, tail) = primed_tracker(log, settings.clone(), store)?;
    if let Err(rejected) = tracker.recover() {
        tracing::info!(%rejected, "No run restored");
        if tracker.host().is_activity_active() {
            tracker.handle_signal(HostSignal::ZoneChanged);
        }
    }

    let refresh = Duration::from_millis(settings.refresh_interval_ms);
    let persist = Cadence::new(Duration::from_secs(settings.persist_interval_secs));
    let mut app = App::new(tracker, persist);

    let source = CrosstermEventSource::new();
    source.follow(tail, refresh);
    let runner = Runner::new(source, FixedTicker::new(refresh));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = start_tui(&mut terminal, &mut app, &runner);
    app.tracker.persist_tick();

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn start_tui<B: Backend, E: EventSource, T: Ticker, S: RunStore>(
    terminal: &mut Terminal<B>,
    app: &mut App<S>,
    runner: &Runner<E, T>,
) -> Result<(), Box<dyn Error>> {
    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit() {
        if app.handle_event(runner.step()) {
            terminal.draw(|f| app.draw(f))?;
        }
    }

    Ok(())
}

fn replay(log: &Path, settings: Settings, store: SqliteStore) -> Result<(), Box<dyn Error>> {
    let path = resolve_log_path(log)?
        .ok_or_else(|| format!("no combat log found at {}", log.display()))?;
    let reader = BufReader::new(File::open(&path)?);
    let mut tracker = Tracker::new(CombatLogHost::new(), store, settings)?;

    for raw in reader.split(b'\n') {
        let line = decode_line(&raw?);
        let Some(signal) = tracker.host_mut().consume_line(&line) else {
            continue;
        };
        let label = signal.to_string();
        let runs_before = tracker.aggregate().total_runs;
        tracker.handle_signal(signal);

        if tracker.aggregate().total_runs > runs_before {
            if let Some(run) = tracker.history().runs().last() {
                println!("{label}: {}", run_line(run));
            }
        }
        if tracker.is_tracking() {
            println!("{label}: {}", status_report(&tracker.tick()));
        }
    }

    if tracker.is_tracking() {
        println!("log ended mid-run: {}", status_report(&tracker.tick()));
    }
    print_stats(tracker.aggregate());
    Ok(())
}
