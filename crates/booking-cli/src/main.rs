//! `booking` CLI: schedule intake requests against the booking ledger.
//!
//! ## Usage
//!
//! ```sh
//! # Schedule every request in an intake file, writing invites to ./out
//! booking run -i intake.json
//!
//! # Use a specific ledger and invite directory, with 45-minute slots
//! booking run -i intake.json --ledger data/bookings.jsonl --out invites --duration 45
//!
//! # Layer settings from a TOML file, print the summary as JSON
//! booking run -i intake.json --config booking.toml --json
//!
//! # Form exports in CSV (name,email,preferred_slots) work too
//! booking run -i intake_responses.csv
//!
//! # Read the intake from stdin
//! cat intake.json | booking run -i -
//!
//! # Bring a legacy start,end bookings CSV into the ledger
//! booking import -f existing_bookings.csv
//!
//! # List what is already booked
//! booking ledger --ledger data/bookings.jsonl
//! ```
//!
//! Settings are layered: built-in defaults, then `--config`, then
//! `BOOKING__*` environment variables, then flags. Logs go to stderr; raise
//! verbosity with `-v`/`-vv` or set `RUST_LOG`.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use booking_engine::lock::DEFAULT_MAX_RETRIES;
use booking_engine::{
    import_blocks, parse_intake_as, read_csv_blocks, DirectorySink, FileLedger, IntakeFormat,
    Ledger, LedgerLock, LockedLedger, RunOutcome, RunSummary, Scheduler, Settings,
};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "booking",
    version,
    about = "Match intake requests to free slots and issue calendar invites"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule every request in an intake file
    Run {
        /// Intake file, JSON or CSV (`-` reads stdin)
        #[arg(short, long)]
        input: String,
        /// Intake format; defaults to the file extension (`.csv`), else JSON
        #[arg(long)]
        format: Option<IntakeFormat>,
        #[command(flatten)]
        common: CommonArgs,
        /// Directory invites are written to
        #[arg(long)]
        out: Option<PathBuf>,
        /// Appointment length in minutes
        #[arg(long)]
        duration: Option<u32>,
        /// IANA time zone for invite times (e.g. "Europe/Zurich")
        #[arg(long)]
        time_zone: Option<String>,
        /// Organizer address on every invite
        #[arg(long)]
        organizer_email: Option<String>,
    },
    /// List committed bookings in the order they were recorded
    Ledger {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Record the blocks of a legacy `start,end` bookings CSV in the ledger
    Import {
        /// Legacy bookings CSV
        #[arg(short, long)]
        from: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Ledger file (JSON Lines)
    #[arg(long)]
    ledger: Option<PathBuf>,
    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            input,
            format,
            common,
            out,
            duration,
            time_zone,
            organizer_email,
        } => {
            let mut settings = load_settings(&common)?;
            if let Some(dir) = out {
                settings.output_dir = dir;
            }
            if let Some(minutes) = duration {
                settings.duration_minutes = minutes;
            }
            if let Some(tz) = time_zone {
                settings.time_zone = tz;
            }
            if let Some(email) = organizer_email {
                settings.organizer_email = email;
            }
            settings.validate().context("Invalid settings")?;
            let format = format.unwrap_or_else(|| IntakeFormat::from_path(Path::new(&input)));
            run(&input, format, &settings, common.json)
        }
        Commands::Ledger { common } => {
            let settings = load_settings(&common)?;
            list_ledger(&settings.ledger_path, common.json)
        }
        Commands::Import { from, common } => {
            let settings = load_settings(&common)?;
            settings.validate().context("Invalid settings")?;
            import(&from, &settings, common.json)
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A second init (e.g. from a test harness) is harmless.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .try_init();
}

fn load_settings(common: &CommonArgs) -> Result<Settings> {
    let mut settings = Settings::load(common.config.as_deref()).context("Failed to load settings")?;
    if let Some(path) = &common.ledger {
        settings.ledger_path = path.clone();
    }
    debug!(?settings, "settings loaded");
    Ok(settings)
}

fn run(input: &str, format: IntakeFormat, settings: &Settings, json: bool) -> Result<()> {
    let intake = read_input(input)?;
    let records = parse_intake_as(&intake, format)
        .with_context(|| format!("Failed to parse intake: {}", input))?;
    info!(records = records.len(), input, %format, "intake read");

    let ledger = locked_ledger(settings)?;
    let sink = DirectorySink::new(&settings.output_dir);
    let renderer = settings.renderer().context("Failed to configure invites")?;
    let mut scheduler = Scheduler::open(ledger, sink, renderer, settings.duration()).with_context(
        || format!("Failed to load ledger: {}", settings.ledger_path.display()),
    )?;

    let summary = scheduler.run(&records);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", render_summary(&summary));
    }

    if let Some(reason) = &summary.aborted {
        anyhow::bail!("Run aborted: {}", reason);
    }
    Ok(())
}

/// The configured file ledger, locked until it is dropped and renewed on
/// every load and append.
fn locked_ledger(settings: &Settings) -> Result<LockedLedger<FileLedger>> {
    let lock = LedgerLock::acquire(&settings.ledger_path, settings.lock_ttl(), DEFAULT_MAX_RETRIES)
        .context("Failed to lock the ledger")?;
    Ok(LockedLedger::new(FileLedger::new(&settings.ledger_path), lock))
}

fn import(from: &Path, settings: &Settings, json: bool) -> Result<()> {
    let blocks = read_csv_blocks(from)
        .with_context(|| format!("Failed to read bookings CSV: {}", from.display()))?;
    let mut ledger = locked_ledger(settings)?;
    let report = import_blocks(&mut ledger, &blocks)
        .with_context(|| format!("Failed to import into ledger: {}", settings.ledger_path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Imported:           {}", report.imported);
        println!("Already present:    {}", report.already_present);
        if report.overlapping > 0 {
            println!("Overlapping:        {}", report.overlapping);
        }
    }
    Ok(())
}

fn list_ledger(path: &Path, json: bool) -> Result<()> {
    let bookings = FileLedger::new(path)
        .load()
        .with_context(|| format!("Failed to load ledger: {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&bookings)?);
        return Ok(());
    }

    if bookings.is_empty() {
        println!("No committed bookings.");
        return Ok(());
    }
    for booking in &bookings {
        let who = match (&booking.name, &booking.attendee) {
            (Some(name), Some(email)) => format!("{} <{}>", name, email),
            (None, Some(email)) => email.clone(),
            (Some(name), None) => name.clone(),
            (None, None) => "(blocked)".to_string(),
        };
        println!("{}  {}", booking.interval, who);
    }
    println!("{} booking(s)", bookings.len());
    Ok(())
}

fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("Processed:          {}\n", summary.total));
    out.push_str(&format!("Scheduled:          {}\n", summary.scheduled));
    out.push_str(&format!("Already scheduled:  {}\n", summary.already_scheduled));
    out.push_str(&format!("Unschedulable:      {}\n", summary.unschedulable));
    out.push_str(&format!("Invalid:            {}\n", summary.invalid));
    out.push_str(&format!("Artifact warnings:  {}\n", summary.artifact_warnings));

    for outcome in &summary.outcomes {
        let line = match outcome {
            RunOutcome::Scheduled {
                name,
                interval,
                artifact,
                artifact_warning,
                skipped_slots,
                ..
            } => {
                let mut line = format!(
                    "  scheduled      {}  {}  {}",
                    name,
                    interval.start().format("%Y-%m-%d %H:%M"),
                    artifact.as_deref().unwrap_or("(no invite)")
                );
                if let Some(warning) = artifact_warning {
                    line.push_str(&format!("\n    warning: {}", warning));
                }
                if !skipped_slots.is_empty() {
                    line.push_str(&format!("\n    skipped slots: {}", skipped_slots.join(", ")));
                }
                line
            }
            RunOutcome::AlreadyScheduled { name, interval, .. } => format!(
                "  already booked {}  {}",
                name,
                interval.start().format("%Y-%m-%d %H:%M")
            ),
            RunOutcome::Unschedulable { request } => {
                format!("  unschedulable  {}  no free preferred slot", request.name)
            }
            RunOutcome::Invalid { request } => format!(
                "  invalid        {}  {}",
                request.name.as_deref().unwrap_or("<unnamed>"),
                request.reason
            ),
        };
        out.push_str(&line);
        out.push('\n');
    }

    if let Some(reason) = &summary.aborted {
        out.push_str(&format!("Aborted: {}\n", reason));
    }
    out
}

fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path))
}
